use std::sync::Arc;

use crate::jobs::{JobPhase, JobProgress, JobStore};

/// Percent reported at the start of each step.
pub mod percent {
    pub const STARTING: u8 = 10;
    pub const CACHE_LOOKUP: u8 = 20;
    pub const EXTRACTING: u8 = 30;
    pub const EXTRACTED: u8 = 50;
    pub const CACHING: u8 = 60;
    pub const AUGMENTING: u8 = 70;
    pub const STORING: u8 = 90;
}

/// Maps page `page` of `total` into the extraction band (30..=50).
pub fn extraction_percent(page: usize, total: usize) -> u8 {
    if total == 0 {
        return percent::EXTRACTING;
    }
    let band = usize::from(percent::EXTRACTED - percent::EXTRACTING);
    let done = page.min(total) * band / total;
    percent::EXTRACTING + done as u8
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: JobProgress);

    fn phase(&self, percent: u8, phase: JobPhase, message: &str) {
        self.report(JobProgress::new(percent, phase, message));
    }
}

/// No-op reporter for synchronous runs and unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _progress: JobProgress) {}
}

/// Writes progress of one job into the job store.
pub struct StoreProgress {
    store: Arc<JobStore>,
    job_id: String,
}

impl StoreProgress {
    pub fn new(store: Arc<JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }
}

impl ProgressReporter for StoreProgress {
    fn report(&self, progress: JobProgress) {
        if let Err(e) = self.store.update_progress(&self.job_id, progress) {
            log::warn!("Dropped progress update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use crate::jobs::JobState;
    use crate::strategy::StrategyId;

    #[test]
    fn test_extraction_percent_band() {
        assert_eq!(extraction_percent(0, 4), 30);
        assert_eq!(extraction_percent(1, 4), 35);
        assert_eq!(extraction_percent(2, 4), 40);
        assert_eq!(extraction_percent(4, 4), 50);
        assert_eq!(extraction_percent(9, 4), 50);
        assert_eq!(extraction_percent(1, 0), 30);
        assert_eq!(extraction_percent(1, 3), 36);
    }

    #[test]
    fn test_store_progress_updates_running_job() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let job = store.create(StrategyId::Marker);
        store.start(&job.id).unwrap();

        let reporter = StoreProgress::new(Arc::clone(&store), &job.id);
        reporter.phase(percent::CACHE_LOOKUP, JobPhase::CacheLookup, "Checking cache");

        let record = store.get(&job.id).unwrap();
        assert_eq!(record.state, JobState::InProgress);
        let progress = record.progress.unwrap();
        assert_eq!(progress.percent, 20);
        assert_eq!(progress.phase, JobPhase::CacheLookup);
    }

    #[test]
    fn test_store_progress_ignores_finished_job() {
        let store = Arc::new(JobStore::new(&JobsConfig::default()));
        let job = store.create(StrategyId::Marker);

        // Pending job: the update is dropped, not applied
        StoreProgress::new(Arc::clone(&store), &job.id).phase(50, JobPhase::Extracting, "x");
        assert!(store.get(&job.id).unwrap().progress.is_none());
    }
}
