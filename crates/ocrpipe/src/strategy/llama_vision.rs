use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;

use super::render::PdfWorkspace;
use super::{ExtractionStrategy, PageProgress, StrategyId};
use crate::config::VisionConfig;
use crate::error::ExtractionError;
use crate::llm::{with_model_recovery, GenerationService};

/// Transcribes each rendered page with a vision model.
pub struct LlamaVisionStrategy {
    generator: Arc<dyn GenerationService>,
    config: VisionConfig,
    auto_pull: bool,
}

impl LlamaVisionStrategy {
    pub fn new(generator: Arc<dyn GenerationService>, config: VisionConfig, auto_pull: bool) -> Self {
        Self {
            generator,
            config,
            auto_pull,
        }
    }

    fn transcribe_page(&self, page: usize, png: &[u8]) -> Result<String, ExtractionError> {
        let image = encode_page_image(png, self.config.max_image_dim)
            .map_err(|reason| ExtractionError::Vision { page, reason })?;
        let images = [image];

        with_model_recovery(
            self.generator.as_ref(),
            &self.config.model,
            self.auto_pull,
            || {
                self.generator
                    .describe_images(&self.config.model, &self.config.prompt, &images)
            },
        )
        .map_err(|e| ExtractionError::Vision {
            page,
            reason: e.to_string(),
        })
    }
}

/// Downscales a rendered page so its longest edge fits `max_dim` and
/// re-encodes it as base64 JPEG.
fn encode_page_image(png: &[u8], max_dim: u32) -> Result<String, String> {
    let img = image::load_from_memory(png).map_err(|e| format!("Failed to load image: {}", e))?;
    let img = if img.width() > max_dim || img.height() > max_dim {
        img.resize(max_dim, max_dim, FilterType::Triangle)
    } else {
        img
    };

    let mut jpeg = Vec::new();
    img.to_rgb8()
        .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .map_err(|e| format!("Failed to encode image: {}", e))?;

    Ok(BASE64.encode(jpeg))
}

impl ExtractionStrategy for LlamaVisionStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::LlamaVision
    }

    fn extract_text(
        &self,
        document: &[u8],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError> {
        let _span =
            tracing::info_span!("strategy.llama_vision", model = %self.config.model).entered();

        let workspace = PdfWorkspace::new(document)?;
        let total = workspace.page_count(document)?;
        let mut extracted = String::new();

        for page in 1..=total {
            let image_path = workspace.render_page(page, self.config.dpi)?;
            let png = std::fs::read(&image_path).map_err(|e| ExtractionError::Rendering {
                page,
                reason: format!("Failed to read rendered image: {}", e),
            })?;
            let _ = std::fs::remove_file(&image_path);

            let text = self.transcribe_page(page, &png)?;
            tracing::debug!(page, total, chars = text.len(), "Page transcribed");
            if !extracted.is_empty() && !extracted.ends_with('\n') {
                extracted.push('\n');
            }
            extracted.push_str(&text);
            progress.page_done(page, total);
        }

        Ok(extracted)
    }
}
