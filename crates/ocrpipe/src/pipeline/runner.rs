use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::config::FailurePolicy;
use crate::error::ErrorKind;
use crate::fingerprint::Fingerprint;
use crate::jobs::{JobOutput, JobPhase, JobWarning};
use crate::llm::LlmPostProcessor;
use crate::storage::StorageGateway;
use crate::strategy::StrategyRegistry;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, Step};
use super::progress::{extraction_percent, percent, ProgressReporter};
use super::timeout::{run_with_deadline, StepFailure};

/// Body of one extraction job: fingerprint, cache lookup, extraction, cache
/// write, augmentation, persistence.
pub struct Pipeline {
    config: PipelineConfig,
    registry: StrategyRegistry,
    cache: Arc<dyn ResultCache>,
    llm: LlmPostProcessor,
    storage: Arc<dyn StorageGateway>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        registry: StrategyRegistry,
        cache: Arc<dyn ResultCache>,
        llm: LlmPostProcessor,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            llm,
            storage,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn llm(&self) -> &LlmPostProcessor {
        &self.llm
    }

    pub fn storage(&self) -> &Arc<dyn StorageGateway> {
        &self.storage
    }

    /// Runs every applicable step in order.
    ///
    /// Steps after extraction only fail the run under the strict policy;
    /// otherwise their failures are attached to the output as warnings.
    /// A timeout fails the run under either policy.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutput, PipelineError> {
        let _pipeline_span = info_span!("pipeline",
            job_id = ctx.job_id.as_deref().unwrap_or("sync"),
            strategy = %ctx.strategy,
            bytes = ctx.request.document.len(),
            cache = ctx.request.cache_enabled,
        )
        .entered();

        progress.phase(percent::STARTING, JobPhase::Starting, "Starting");

        // Step 1: Fingerprint
        {
            let _step = info_span!("fingerprint").entered();
            self.step_fingerprint(&mut ctx);
        }

        // Step 2: Cache lookup
        if ctx.request.cache_enabled {
            let _step = info_span!("cache_lookup").entered();
            progress.phase(
                percent::CACHE_LOOKUP,
                JobPhase::CacheLookup,
                "Checking result cache...",
            );
            self.step_cache_lookup(&mut ctx);
        }

        // Step 3: Extract
        if !ctx.cache_hit {
            let _step = info_span!("extract").entered();
            progress.phase(
                percent::EXTRACTING,
                JobPhase::Extracting,
                &format!("Extracting text with {}...", ctx.strategy),
            );
            self.step_extract(&mut ctx, progress)?;
            progress.phase(percent::EXTRACTED, JobPhase::Extracting, "Text extracted");

            // Step 4: Cache write
            if ctx.request.cache_enabled {
                let _step = info_span!("cache_write").entered();
                progress.phase(percent::CACHING, JobPhase::Caching, "Caching result...");
                self.step_cache_write(&ctx);
            }
        }

        // Step 5: Augment
        if ctx.request.generation().is_some() {
            let _step = info_span!("augment").entered();
            progress.phase(
                percent::AUGMENTING,
                JobPhase::Augmenting,
                "Post-processing with language model...",
            );
            if let Err(e) = self.step_augment(&mut ctx) {
                self.tolerate(&mut ctx, e)?;
            }
        }

        // Step 6: Store
        if ctx.request.destination().is_some() {
            let _step = info_span!("store").entered();
            progress.phase(percent::STORING, JobPhase::Storing, "Storing result...");
            if let Err(e) = self.step_store(&mut ctx) {
                self.tolerate(&mut ctx, e)?;
            }
        }

        Ok(Self::into_output(ctx))
    }

    /// Under the lenient policy, records `error` as a warning and continues.
    fn tolerate(&self, ctx: &mut PipelineContext, error: PipelineError) -> Result<(), PipelineError> {
        if error.kind() == ErrorKind::Timeout {
            return Err(error);
        }
        match self.config.failure_policy {
            FailurePolicy::Strict => Err(error),
            FailurePolicy::Lenient => {
                warn!("Continuing without optional step: {}", error);
                ctx.warnings
                    .push(JobWarning::new(error.kind(), error.to_string()));
                Ok(())
            }
        }
    }

    fn step_fingerprint(&self, ctx: &mut PipelineContext) {
        let fingerprint = Fingerprint::of(&ctx.request.document);
        debug!(fingerprint = %fingerprint.short(), "Fingerprint computed");
        ctx.fingerprint = Some(fingerprint);
    }

    fn cache_key(ctx: &PipelineContext) -> CacheKey {
        let fingerprint = ctx
            .fingerprint
            .unwrap_or_else(|| Fingerprint::of(&ctx.request.document));
        CacheKey::new(fingerprint, ctx.strategy)
    }

    /// A failing cache read is treated as a miss.
    fn step_cache_lookup(&self, ctx: &mut PipelineContext) {
        match self.cache.get(&Self::cache_key(ctx)) {
            Ok(Some(text)) => {
                debug!(chars = text.len(), "Cache hit");
                ctx.extracted_text = Some(text);
                ctx.cache_hit = true;
            }
            Ok(None) => debug!("Cache miss"),
            Err(e) => warn!("Cache lookup failed, extracting instead: {}", e),
        }
    }

    fn step_extract(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let strategy = self
            .registry
            .get_by_id(ctx.strategy)
            .ok_or(PipelineError::StrategyUnavailable(ctx.strategy))?;
        let document = Arc::clone(&ctx.request.document);
        let limit = self.config.extraction_timeout;

        let on_page = |page: usize, total: usize| {
            progress.phase(
                extraction_percent(page, total),
                JobPhase::Extracting,
                &format!("Extracted page {} of {}", page, total),
            );
        };

        let text = run_with_deadline(
            "extract",
            limit,
            move |pages| strategy.extract_text(&document, pages),
            &on_page,
        )
        .map_err(|failure| match failure {
            StepFailure::TimedOut => PipelineError::Timeout {
                step: Step::Extraction,
                limit,
            },
            StepFailure::Panicked(reason) => PipelineError::Panicked {
                step: Step::Extraction,
                reason,
            },
        })??;

        debug!(chars = text.len(), "Extraction finished");
        ctx.extracted_text = Some(text);
        Ok(())
    }

    /// Best effort: a failed write is logged and the job carries on.
    fn step_cache_write(&self, ctx: &PipelineContext) {
        let Some(text) = ctx.extracted_text.as_deref() else {
            return;
        };
        if let Err(e) = self.cache.set(&Self::cache_key(ctx), text) {
            warn!("Failed to cache extraction result: {}", e);
        }
    }

    fn step_augment(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let Some((model, prompt)) = ctx.request.generation() else {
            return Ok(());
        };
        let extracted = ctx.extracted_text.clone().unwrap_or_default();
        let (model, prompt) = (model.to_string(), prompt.to_string());
        let llm = self.llm.clone();
        let limit = self.config.generation_timeout;

        let answer = run_with_deadline(
            "augment",
            limit,
            move |_| llm.augment(&model, &prompt, &extracted),
            &|_, _| {},
        )
        .map_err(|failure| match failure {
            StepFailure::TimedOut => PipelineError::Timeout {
                step: Step::Augmentation,
                limit,
            },
            StepFailure::Panicked(reason) => PipelineError::Panicked {
                step: Step::Augmentation,
                reason,
            },
        })??;

        debug!(chars = answer.len(), "Augmentation finished");
        ctx.augmented_text = Some(answer);
        Ok(())
    }

    fn step_store(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let Some((profile, filename)) = ctx.request.destination() else {
            return Ok(());
        };
        let text = ctx.final_text().unwrap_or_default();
        let location = self.storage.put(profile, filename, text.as_bytes())?;
        debug!(profile, "Result stored");
        ctx.stored_location = Some(location);
        Ok(())
    }

    fn into_output(ctx: PipelineContext) -> JobOutput {
        let fingerprint = ctx
            .fingerprint
            .unwrap_or_else(|| Fingerprint::of(&ctx.request.document));
        let extracted_text = ctx.extracted_text.clone().unwrap_or_default();
        let augmented = ctx.augmented_text.is_some();
        let text = ctx.augmented_text.unwrap_or_else(|| extracted_text.clone());

        JobOutput {
            text,
            extracted_text,
            strategy: ctx.strategy,
            fingerprint,
            cache_hit: ctx.cache_hit,
            augmented,
            stored_location: ctx.stored_location,
            warnings: ctx.warnings,
        }
    }
}
