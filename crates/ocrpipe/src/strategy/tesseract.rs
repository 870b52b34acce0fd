use std::path::Path;

use super::render::PdfWorkspace;
use super::{ExtractionStrategy, PageProgress, StrategyId};
use crate::error::ExtractionError;

/// Classic OCR: every page is rendered with `pdftoppm` and recognised by
/// Tesseract.
///
/// Uses the `tesseract` CLI by default; with the `leptess` feature the
/// engine runs in-process.
#[derive(Debug, Clone)]
pub struct TesseractStrategy {
    languages: String,
    dpi: u32,
}

impl TesseractStrategy {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self { languages, dpi }
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    #[cfg(not(feature = "leptess"))]
    fn ocr_image(&self, image_path: &Path) -> Result<String, ExtractionError> {
        let output = std::process::Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.languages])
            .output()
            .map_err(|e| super::render::tool_error("tesseract", "tesseract-ocr", e))?;

        if !output.status.success() {
            return Err(ExtractionError::OcrFailed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    #[cfg(feature = "leptess")]
    fn ocr_image(&self, image_path: &Path) -> Result<String, ExtractionError> {
        let mut lt = leptess::LepTess::new(None, &self.languages).map_err(|e| {
            ExtractionError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;
        lt.set_image(image_path)
            .map_err(|e| ExtractionError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;
        lt.get_utf8_text()
            .map_err(|e| ExtractionError::OcrFailed(format!("OCR failed: {}", e)))
    }
}

impl ExtractionStrategy for TesseractStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Tesseract
    }

    fn extract_text(
        &self,
        document: &[u8],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("strategy.tesseract", dpi = self.dpi).entered();

        let workspace = PdfWorkspace::new(document)?;
        let total = workspace.page_count(document)?;
        let mut all_text = String::new();

        for page in 1..=total {
            let image_path = workspace.render_page(page, self.dpi)?;
            let page_text = self.ocr_image(&image_path)?;
            all_text.push_str(page_text.trim_end());
            all_text.push('\n');
            // Rendered pages can be large; drop each once recognised
            let _ = std::fs::remove_file(&image_path);
            progress.page_done(page, total);
        }

        Ok(all_text)
    }
}
