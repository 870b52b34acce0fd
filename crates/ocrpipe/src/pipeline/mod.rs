pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod timeout;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::{PipelineError, Step};
pub use progress::{NoopProgress, ProgressReporter, StoreProgress};
pub use runner::Pipeline;
