//! Extraction strategies and the registry that dispatches to them.

mod layout;
mod llama_vision;
pub mod render;
mod tesseract;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::error::{ExtractionError, ServiceError};
use crate::llm::GenerationService;

pub use layout::LayoutStrategy;
pub use llama_vision::LlamaVisionStrategy;
pub use tesseract::TesseractStrategy;

/// Closed set of extraction strategies.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Layout-aware extraction from the PDF text layer.
    #[default]
    Marker,
    /// Page rendering followed by classic OCR.
    Tesseract,
    /// Page images transcribed by a vision model.
    LlamaVision,
}

impl StrategyId {
    pub const ALL: [StrategyId; 3] = [
        StrategyId::Marker,
        StrategyId::Tesseract,
        StrategyId::LlamaVision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::Marker => "marker",
            StrategyId::Tesseract => "tesseract",
            StrategyId::LlamaVision => "llama_vision",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown strategy '{requested}'. Available: {available}")]
pub struct UnknownStrategy {
    pub requested: String,
    pub available: String,
}

impl From<UnknownStrategy> for ServiceError {
    fn from(e: UnknownStrategy) -> Self {
        ServiceError::UnknownStrategy {
            strategy: e.requested,
            available: e.available,
        }
    }
}

impl FromStr for StrategyId {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StrategyId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| UnknownStrategy {
                requested: s.to_string(),
                available: join_ids(StrategyId::ALL),
            })
    }
}

fn join_ids(ids: impl IntoIterator<Item = StrategyId>) -> String {
    ids.into_iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Receives per-page advancement from strategies that work page by page.
pub trait PageProgress: Send + Sync {
    fn page_done(&self, page: usize, total: usize);
}

/// Discards page progress.
pub struct NoPageProgress;

impl PageProgress for NoPageProgress {
    fn page_done(&self, _page: usize, _total: usize) {}
}

/// A text extraction algorithm.
pub trait ExtractionStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Extracts text from raw PDF bytes.
    fn extract_text(
        &self,
        document: &[u8],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError>;
}

/// Maps strategy ids to implementations. Immutable once built.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<StrategyId, Arc<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    /// Registers the given strategies; a later entry with the same id wins.
    pub fn with_strategies(
        strategies: impl IntoIterator<Item = Arc<dyn ExtractionStrategy>>,
    ) -> Self {
        let strategies = strategies.into_iter().map(|s| (s.id(), s)).collect();
        Self { strategies }
    }

    /// Builds the strategies enabled in `config`.
    pub fn from_config(config: &Config, generator: Arc<dyn GenerationService>) -> Self {
        let settings = &config.strategies;
        let strategies = settings.enabled.iter().map(|id| -> Arc<dyn ExtractionStrategy> {
            match id {
                StrategyId::Marker => Arc::new(LayoutStrategy::new()),
                StrategyId::Tesseract => Arc::new(TesseractStrategy::new(
                    &settings.ocr.languages,
                    settings.ocr.dpi,
                )),
                StrategyId::LlamaVision => Arc::new(LlamaVisionStrategy::new(
                    generator.clone(),
                    settings.vision.clone(),
                    config.llm.auto_pull,
                )),
            }
        });
        Self::with_strategies(strategies)
    }

    /// Registered ids in a stable order.
    pub fn available(&self) -> Vec<StrategyId> {
        self.strategies.keys().copied().collect()
    }

    /// Parses `name` and checks that it is registered.
    pub fn resolve(&self, name: &str) -> Result<StrategyId, UnknownStrategy> {
        let unknown = || UnknownStrategy {
            requested: name.to_string(),
            available: join_ids(self.available()),
        };
        let id = name.parse::<StrategyId>().map_err(|_| unknown())?;
        if self.strategies.contains_key(&id) {
            Ok(id)
        } else {
            Err(unknown())
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ExtractionStrategy>, UnknownStrategy> {
        let id = self.resolve(name)?;
        self.get_by_id(id).ok_or_else(|| UnknownStrategy {
            requested: name.to_string(),
            available: join_ids(self.available()),
        })
    }

    pub fn get_by_id(&self, id: StrategyId) -> Option<Arc<dyn ExtractionStrategy>> {
        self.strategies.get(&id).cloned()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(StrategyId, &'static str);

    impl ExtractionStrategy for Fixed {
        fn id(&self) -> StrategyId {
            self.0
        }

        fn extract_text(&self, _: &[u8], _: &dyn PageProgress) -> Result<String, ExtractionError> {
            Ok(self.1.to_string())
        }
    }

    #[test]
    fn test_strategy_id_parsing() {
        assert_eq!("marker".parse::<StrategyId>().unwrap(), StrategyId::Marker);
        assert_eq!("Tesseract".parse::<StrategyId>().unwrap(), StrategyId::Tesseract);
        assert_eq!(
            "llama-vision".parse::<StrategyId>().unwrap(),
            StrategyId::LlamaVision
        );
        let err = "easyocr".parse::<StrategyId>().unwrap_err();
        assert_eq!(err.requested, "easyocr");
        assert!(err.available.contains("marker"));
    }

    #[test]
    fn test_strategy_id_serde_names() {
        assert_eq!(
            serde_json::to_string(&StrategyId::LlamaVision).unwrap(),
            "\"llama_vision\""
        );
        for id in StrategyId::ALL {
            assert_eq!(id.as_str().parse::<StrategyId>().unwrap(), id);
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = StrategyRegistry::with_strategies([
            Arc::new(Fixed(StrategyId::Marker, "layout")) as Arc<dyn ExtractionStrategy>,
            Arc::new(Fixed(StrategyId::Tesseract, "ocr")),
        ]);

        assert_eq!(
            registry.available(),
            vec![StrategyId::Marker, StrategyId::Tesseract]
        );
        let s = registry.get("tesseract").unwrap();
        assert_eq!(s.extract_text(b"", &NoPageProgress).unwrap(), "ocr");
    }

    #[test]
    fn test_registry_rejects_unregistered_strategy() {
        let registry = StrategyRegistry::with_strategies([
            Arc::new(Fixed(StrategyId::Marker, "layout")) as Arc<dyn ExtractionStrategy>
        ]);

        // Known id, not registered
        let err = registry.get("llama_vision").err().unwrap();
        assert_eq!(err.available, "marker");

        // Unknown id
        let err = registry.resolve("nope").unwrap_err();
        assert_eq!(err.requested, "nope");

        let service_err: ServiceError = err.into();
        assert_eq!(service_err.kind(), crate::error::ErrorKind::UnknownStrategy);
    }

    #[test]
    fn test_from_config_registers_enabled_only() {
        use crate::llm::{LlmError, ModelInfo};

        struct Offline;
        impl GenerationService for Offline {
            fn generate(&self, _: &str, _: &str) -> Result<String, LlmError> {
                Err(LlmError::Connection("offline".into()))
            }
            fn describe_images(&self, _: &str, _: &str, _: &[String]) -> Result<String, LlmError> {
                Err(LlmError::Connection("offline".into()))
            }
            fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
                Ok(Vec::new())
            }
            fn pull(&self, _: &str) -> Result<(), LlmError> {
                Ok(())
            }
        }

        let mut config = Config::default();
        config.strategies.enabled = vec![StrategyId::Marker, StrategyId::LlamaVision];
        let registry = StrategyRegistry::from_config(&config, Arc::new(Offline));
        assert_eq!(
            registry.available(),
            vec![StrategyId::Marker, StrategyId::LlamaVision]
        );
        assert!(registry.get("tesseract").is_err());
        assert_eq!(
            registry.get_by_id(StrategyId::Marker).unwrap().id(),
            StrategyId::Marker
        );
    }
}
