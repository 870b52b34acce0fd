use crate::fingerprint::Fingerprint;
use crate::jobs::JobWarning;
use crate::strategy::StrategyId;
use crate::worker::job::ExtractionRequest;

pub struct PipelineContext {
    // Input
    pub job_id: Option<String>,
    pub strategy: StrategyId,
    pub request: ExtractionRequest,

    // Step 1 result
    pub fingerprint: Option<Fingerprint>,

    // Step 2/3 result: cached or freshly extracted text
    pub extracted_text: Option<String>,
    pub cache_hit: bool,

    // Step 5 result
    pub augmented_text: Option<String>,

    // Step 6 result
    pub stored_location: Option<String>,

    // Non-fatal failures under the lenient policy
    pub warnings: Vec<JobWarning>,
}

impl PipelineContext {
    pub fn new(strategy: StrategyId, request: ExtractionRequest) -> Self {
        Self {
            job_id: None,
            strategy,
            request,
            fingerprint: None,
            extracted_text: None,
            cache_hit: false,
            augmented_text: None,
            stored_location: None,
            warnings: Vec::new(),
        }
    }

    pub fn for_job(job_id: impl Into<String>, strategy: StrategyId, request: ExtractionRequest) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::new(strategy, request)
        }
    }

    /// Final text: the generation output when augmentation ran, else the
    /// extraction.
    pub fn final_text(&self) -> Option<&str> {
        self.augmented_text
            .as_deref()
            .or(self.extracted_text.as_deref())
    }
}
