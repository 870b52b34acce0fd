//! Test doubles and document builders.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lopdf::{dictionary, Document, Object, Stream};
use ocrpipe::error::ExtractionError;
use ocrpipe::llm::ModelInfo;
use ocrpipe::strategy::PageProgress;
use ocrpipe::{ExtractionStrategy, GenerationService, LlmError, StrategyId};

/// Builds a PDF with one page per entry, each page drawing its text in Courier.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
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
        let content = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text);
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
    doc.save_to(&mut bytes).expect("save test PDF");
    bytes
}

/// Minimal byte string that passes the PDF signature check.
pub fn tiny_pdf(tag: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {}\n%%EOF", tag).into_bytes()
}

/// Strategy that counts invocations and reports two pages.
pub struct CountingStrategy {
    id: StrategyId,
    calls: AtomicUsize,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl CountingStrategy {
    pub fn new(id: StrategyId) -> Self {
        Self {
            id,
            calls: AtomicUsize::new(0),
            delay: None,
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExtractionStrategy for CountingStrategy {
    fn id(&self) -> StrategyId {
        self.id
    }

    fn extract_text(
        &self,
        document: &[u8],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(ref reason) = self.failure {
            return Err(ExtractionError::OcrFailed(reason.clone()));
        }
        progress.page_done(1, 2);
        progress.page_done(2, 2);
        Ok(format!("{} read {} bytes", self.id, document.len()))
    }
}

/// In-memory generation service.
///
/// Models in `installed` answer prompts; models in `pullable` can be pulled
/// once. With `broken_after_pull` a pull reports success but the model
/// stays missing.
pub struct FakeGenerator {
    installed: Mutex<HashSet<String>>,
    pullable: HashSet<String>,
    broken_after_pull: bool,
    pulls: AtomicUsize,
    generates: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            installed: Mutex::new(HashSet::new()),
            pullable: HashSet::new(),
            broken_after_pull: false,
            pulls: AtomicUsize::new(0),
            generates: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_installed(self, model: &str) -> Self {
        self.installed.lock().unwrap().insert(model.to_string());
        self
    }

    pub fn with_pullable(mut self, model: &str) -> Self {
        self.pullable.insert(model.to_string());
        self
    }

    pub fn broken_after_pull(mut self) -> Self {
        self.broken_after_pull = true;
        self
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn generates(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationService for FakeGenerator {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.installed.lock().unwrap().contains(model) {
            Ok(format!("{} summary ({} chars)", model, prompt.len()))
        } else {
            Err(LlmError::ModelNotFound(model.to_string()))
        }
    }

    fn describe_images(&self, model: &str, _: &str, images: &[String]) -> Result<String, LlmError> {
        if self.installed.lock().unwrap().contains(model) {
            Ok(format!("{} images", images.len()))
        } else {
            Err(LlmError::ModelNotFound(model.to_string()))
        }
    }

    fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let mut names: Vec<String> = self.installed.lock().unwrap().iter().cloned().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| ModelInfo {
                name,
                size: None,
                modified_at: None,
            })
            .collect())
    }

    fn pull(&self, model: &str) -> Result<(), LlmError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if !self.pullable.contains(model) {
            return Err(LlmError::PullFailed {
                model: model.to_string(),
                reason: "file does not exist".to_string(),
            });
        }
        if !self.broken_after_pull {
            self.installed.lock().unwrap().insert(model.to_string());
        }
        Ok(())
    }
}
