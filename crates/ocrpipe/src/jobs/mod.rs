//! Job records, the job store and job event broadcasting.

pub mod events;
pub mod model;
pub mod store;

pub use events::{JobEvent, JobEventBroadcaster};
pub use model::{
    JobOutput, JobPhase, JobProgress, JobRecord, JobState, JobStatus, JobWarning,
};
pub use store::{JobListFilter, JobStore, TransitionError, INTERRUPTED_MESSAGE};
