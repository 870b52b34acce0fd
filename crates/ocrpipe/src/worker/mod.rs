pub mod job;
pub mod pool;

pub use job::{ExtractionRequest, Job};
pub use pool::WorkerPool;
