use std::sync::LazyLock;

use regex::Regex;

use super::{ExtractionStrategy, PageProgress, StrategyId};
use crate::error::ExtractionError;

/// Pattern for Identity-H Unimplemented markers lopdf emits for CID fonts.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

static INLINE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Layout-aware extraction from the PDF text layer.
///
/// Each page becomes a Markdown section (`## Page N`) with whitespace
/// normalised. Documents without any text layer are rejected so callers can
/// pick an OCR strategy instead of receiving an empty result.
#[derive(Debug, Default)]
pub struct LayoutStrategy;

impl LayoutStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for LayoutStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Marker
    }

    fn extract_text(
        &self,
        document: &[u8],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("strategy.marker").entered();

        let doc = lopdf::Document::load_mem(document)
            .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        let pages = doc.get_pages();
        let total = pages.len();
        let mut sections = Vec::with_capacity(total);

        for (index, (page_num, _)) in pages.into_iter().enumerate() {
            match doc.extract_text(&[page_num]) {
                Ok(raw) => {
                    let text = normalize_page_text(&raw);
                    if !text.is_empty() {
                        sections.push(format!("## Page {}\n\n{}", page_num, text));
                    }
                }
                Err(e) => tracing::warn!(page = page_num, "Failed to extract page text: {}", e),
            }
            progress.page_done(index + 1, total);
        }

        if sections.is_empty() {
            return Err(ExtractionError::PdfProcessing(
                "document has no extractable text layer".to_string(),
            ));
        }

        Ok(sections.join("\n\n"))
    }
}

/// Collapses inline whitespace, trims lines and limits blank-line runs.
fn normalize_page_text(raw: &str) -> String {
    let without_markers = raw.replace(IDENTITY_H_PATTERN, "");
    let lines: Vec<String> = without_markers
        .lines()
        .map(|line| INLINE_WHITESPACE.replace_all(line.trim(), " ").into_owned())
        .collect();
    BLANK_RUNS
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::NoPageProgress;
    use lopdf::{dictionary, Document, Object, Stream};
    use std::sync::Mutex;

    fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = if text.is_empty() {
                String::new()
            } else {
                format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text)
            };
            let content_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! {},
                content.into_bytes(),
            )));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    struct Recorder(Mutex<Vec<(usize, usize)>>);

    impl PageProgress for Recorder {
        fn page_done(&self, page: usize, total: usize) {
            self.0.lock().unwrap().push((page, total));
        }
    }

    #[test]
    fn test_extracts_pages_as_sections() {
        let pdf = pdf_with_pages(&["Invoice 2024", "Total due"]);
        let recorder = Recorder(Mutex::new(Vec::new()));

        let text = LayoutStrategy::new().extract_text(&pdf, &recorder).unwrap();

        assert!(text.starts_with("## Page 1"));
        assert!(text.contains("Invoice 2024"));
        assert!(text.contains("## Page 2"));
        assert!(text.contains("Total due"));
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let pdf = pdf_with_pages(&["Same text"]);
        let a = LayoutStrategy::new().extract_text(&pdf, &NoPageProgress).unwrap();
        let b = LayoutStrategy::new().extract_text(&pdf, &NoPageProgress).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_blank_pages_are_skipped() {
        let pdf = pdf_with_pages(&["", "Only page with text"]);
        let text = LayoutStrategy::new().extract_text(&pdf, &NoPageProgress).unwrap();
        assert!(!text.contains("## Page 1"));
        assert!(text.contains("## Page 2"));
    }

    #[test]
    fn test_document_without_text_layer_fails() {
        let pdf = pdf_with_pages(&[""]);
        let err = LayoutStrategy::new()
            .extract_text(&pdf, &NoPageProgress)
            .unwrap_err();
        assert!(err.to_string().contains("no extractable text"));
    }

    #[test]
    fn test_malformed_pdf_fails() {
        let err = LayoutStrategy::new()
            .extract_text(b"%PDF-1.4 but nothing else", &NoPageProgress)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::PdfProcessing(_)));
    }

    #[test]
    fn test_normalize_page_text() {
        assert_eq!(
            normalize_page_text("  Hello \t  world  \n\n\n\n  next\u{a0}\u{a0}line "),
            "Hello world\n\nnext line"
        );
        assert_eq!(
            normalize_page_text("?Identity-H Unimplemented? Total"),
            "Total"
        );
        assert_eq!(normalize_page_text(" \n \n"), "");
    }
}
