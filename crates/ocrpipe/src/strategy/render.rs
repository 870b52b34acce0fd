//! Page rendering through poppler's `pdftoppm`/`pdfinfo`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::error::ExtractionError;

/// A PDF written to a private temp directory so command-line tools can
/// read it. Rendered pages land in the same directory and are removed with it.
pub struct PdfWorkspace {
    dir: TempDir,
    pdf_path: PathBuf,
}

impl PdfWorkspace {
    pub fn new(pdf_bytes: &[u8]) -> Result<Self, ExtractionError> {
        let dir = tempfile::Builder::new()
            .prefix("ocrpipe_")
            .tempdir()
            .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to create temp dir: {}", e)))?;
        let pdf_path = dir.path().join("document.pdf");
        std::fs::write(&pdf_path, pdf_bytes)
            .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;
        Ok(Self { dir, pdf_path })
    }

    pub fn pdf_path(&self) -> &Path {
        &self.pdf_path
    }

    /// Page count from the document structure, falling back to `pdfinfo`
    /// for files lopdf cannot parse.
    pub fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        match lopdf::Document::load_mem(pdf_bytes) {
            Ok(doc) => Ok(doc.get_pages().len()),
            Err(e) => {
                tracing::debug!("lopdf could not parse document ({}), asking pdfinfo", e);
                count_pages_with_pdfinfo(&self.pdf_path)
            }
        }
    }

    /// Renders one page (1-based) to PNG and returns the image path.
    pub fn render_page(&self, page: usize, dpi: u32) -> Result<PathBuf, ExtractionError> {
        let page_str = page.to_string();
        let output_prefix = self.dir.path().join("page");

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi.to_string(), "-f", &page_str, "-l", &page_str])
            .arg(&self.pdf_path)
            .arg(&output_prefix)
            .output()
            .map_err(|e| tool_error("pdftoppm", "poppler-utils", e))?;

        if !output.status.success() {
            return Err(ExtractionError::Rendering {
                page,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        find_page_image(self.dir.path(), page).ok_or_else(|| ExtractionError::Rendering {
            page,
            reason: "no image generated".to_string(),
        })
    }
}

/// Maps a spawn failure of an external tool to an extraction error.
pub(crate) fn tool_error(tool: &str, package: &str, e: std::io::Error) -> ExtractionError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ExtractionError::ToolMissing {
            tool: tool.to_string(),
            reason: format!("not found on PATH (install {})", package),
        }
    } else {
        ExtractionError::PdfProcessing(format!("Failed to run {}: {}", tool, e))
    }
}

/// pdftoppm zero-pads the page suffix to the width of the last page number.
fn find_page_image(dir: &Path, page: usize) -> Option<PathBuf> {
    (1..=4)
        .map(|width| dir.join(format!("page-{:0width$}.png", page, width = width)))
        .find(|p| p.exists())
}

fn count_pages_with_pdfinfo(pdf_path: &Path) -> Result<usize, ExtractionError> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .map_err(|e| tool_error("pdfinfo", "poppler-utils", e))?;

    if !output.status.success() {
        return Err(ExtractionError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        ExtractionError::PdfProcessing("pdfinfo did not report a page count".to_string())
    })
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("Pages:"))
        .find_map(|count| count.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pdfinfo_pages() {
        let stdout = "Producer:       LibreOffice\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_pages(stdout), Some(12));
        assert_eq!(parse_pdfinfo_pages("Title: x\n"), None);
    }

    #[test]
    fn test_find_page_image_padding() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page-03.png"), b"png").unwrap();
        assert_eq!(
            find_page_image(dir.path(), 3),
            Some(dir.path().join("page-03.png"))
        );
        assert!(find_page_image(dir.path(), 4).is_none());
    }

    #[test]
    fn test_workspace_writes_pdf_and_cleans_up() {
        let path;
        {
            let ws = PdfWorkspace::new(b"%PDF-1.4 test").unwrap();
            path = ws.pdf_path().to_path_buf();
            assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 test");
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_tool_maps_to_tool_missing() {
        let err = tool_error(
            "pdftoppm",
            "poppler-utils",
            std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        );
        assert!(matches!(err, ExtractionError::ToolMissing { .. }));
    }
}
