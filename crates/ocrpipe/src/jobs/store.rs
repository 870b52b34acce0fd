//! Job store with optional database write-through.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use super::events::{JobEvent, JobEventBroadcaster};
use super::model::{JobOutput, JobPhase, JobProgress, JobRecord, JobState};
use crate::config::JobsConfig;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};
use crate::error::{ErrorKind, JobError};
use crate::strategy::StrategyId;

/// Message recorded on jobs a previous process left unfinished.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by shutdown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Illegal transition for job '{id}': {from} -> {to}")]
    Illegal {
        id: String,
        from: JobState,
        to: JobState,
    },

    #[error("Job '{id}' is {state}; progress can only change while InProgress")]
    NotRunning { id: String, state: JobState },
}

/// Listing filter; results are newest first.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

// ─── Row conversion ─────────────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: "jobs",
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn to_row(job: &JobRecord) -> JobRow {
    let output = job.output.as_ref().and_then(|o| match serde_json::to_string(o) {
        Ok(json) => Some(json),
        Err(e) => {
            log::error!("Failed to serialize output of job {}: {}", job.id, e);
            None
        }
    });

    JobRow {
        id: job.id.clone(),
        strategy: job.strategy.as_str().to_string(),
        state: job.state.as_str().to_string(),
        percent: job.progress.as_ref().map(|p| p.percent).unwrap_or(0),
        phase: job.progress.as_ref().map(|p| p.phase.as_str().to_string()),
        message: job.progress.as_ref().map(|p| p.message.clone()),
        submitted_at: job.submitted_at.to_rfc3339(),
        updated_at: job.updated_at.to_rfc3339(),
        finished_at: job.finished_at.map(|t| t.to_rfc3339()),
        output,
        error_kind: job.error.as_ref().map(|e| e.kind.as_str().to_string()),
        error_message: job.error.as_ref().map(|e| e.message.clone()),
    }
}

fn from_row(row: &JobRow) -> Result<JobRecord, DatabaseError> {
    let corrupt = |reason: String| DatabaseError::CorruptRow {
        table: "jobs",
        reason,
    };

    let strategy = row
        .strategy
        .parse::<StrategyId>()
        .map_err(|e| corrupt(e.to_string()))?;
    let state =
        JobState::parse(&row.state).ok_or_else(|| corrupt(format!("bad state '{}'", row.state)))?;

    let progress = match row.phase.as_deref() {
        Some(phase) => Some(JobProgress::new(
            row.percent,
            JobPhase::parse(phase).ok_or_else(|| corrupt(format!("bad phase '{}'", phase)))?,
            row.message.clone().unwrap_or_default(),
        )),
        None => None,
    };

    let output = match row.output.as_deref() {
        Some(json) => Some(
            serde_json::from_str::<JobOutput>(json)
                .map_err(|e| corrupt(format!("bad output: {}", e)))?,
        ),
        None => None,
    };

    let error = match (row.error_kind.as_deref(), row.error_message.as_deref()) {
        (Some(kind), message) => Some(JobError::new(
            ErrorKind::parse(kind).ok_or_else(|| corrupt(format!("bad error kind '{}'", kind)))?,
            message.unwrap_or_default(),
        )),
        (None, _) => None,
    };

    Ok(JobRecord {
        id: row.id.clone(),
        strategy,
        state,
        progress,
        submitted_at: parse_timestamp(&row.submitted_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        finished_at: row.finished_at.as_deref().map(parse_timestamp).transpose()?,
        output,
        error,
    })
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Authoritative record of every job's state.
///
/// Every mutation is a single atomic step under the write lock. Changes are
/// written through to the database when one is attached and broadcast to
/// subscribers.
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    db: Option<Database>,
    events: JobEventBroadcaster,
    retention: chrono::Duration,
    max_finished: usize,
}

impl JobStore {
    /// Memory-only store.
    pub fn new(settings: &JobsConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            db: None,
            events: JobEventBroadcaster::default(),
            retention: chrono::Duration::seconds(
                i64::try_from(settings.retention_secs).unwrap_or(i64::MAX / 1000),
            ),
            // the job that just finished must stay pollable
            max_finished: settings.max_finished.max(1),
        }
    }

    /// Store with database write-through.
    ///
    /// Jobs a previous process left `Pending`/`InProgress` are failed with a
    /// `Timeout` error so pollers do not wait forever.
    pub fn with_database(settings: &JobsConfig, db: Database) -> Result<Self, DatabaseError> {
        let interrupted = job_repo::mark_interrupted(
            &db,
            &Utc::now().to_rfc3339(),
            ErrorKind::Timeout.as_str(),
            INTERRUPTED_MESSAGE,
        )?;
        if interrupted > 0 {
            log::warn!(
                "Marked {} unfinished job(s) from a previous run as failed",
                interrupted
            );
        }

        let mut store = Self::new(settings);
        store.db = Some(db);
        Ok(store)
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn persist(&self, job: &JobRecord) {
        if let Some(ref db) = self.db {
            if let Err(e) = job_repo::upsert(db, &to_row(job)) {
                log::error!("Failed to persist job {}: {}", job.id, e);
            }
        }
    }

    fn publish(&self, job: &JobRecord) {
        self.persist(job);
        self.events.send(JobEvent::from_record(job));
    }

    /// Creates a `Pending` job with a fresh id.
    pub fn create(&self, strategy: StrategyId) -> JobRecord {
        let job = JobRecord::new(uuid::Uuid::new_v4().to_string(), strategy);
        self.write_jobs().insert(job.id.clone(), job.clone());
        self.publish(&job);
        log::debug!("Created job {} ({})", job.id, strategy);
        job
    }

    /// Removes a job whose submission was rolled back before it was queued.
    pub(crate) fn discard(&self, id: &str) {
        self.write_jobs().remove(id);
        if let Some(ref db) = self.db {
            if let Err(e) = job_repo::delete(db, id) {
                log::error!("Failed to discard job {}: {}", id, e);
            }
        }
    }

    /// Applies `mutate` to the job after checking `self.state → to`.
    fn transition<F>(&self, id: &str, to: JobState, mutate: F) -> Result<JobRecord, TransitionError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let snapshot = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;
            if !job.state.can_transition_to(to) {
                return Err(TransitionError::Illegal {
                    id: id.to_string(),
                    from: job.state,
                    to,
                });
            }
            let now = Utc::now();
            job.state = to;
            job.updated_at = now;
            if to.is_terminal() {
                job.finished_at = Some(now);
            }
            mutate(job);
            job.clone()
        };

        self.publish(&snapshot);
        if to.is_terminal() {
            self.enforce_max_finished();
        }
        Ok(snapshot)
    }

    /// `Pending → InProgress`.
    pub fn start(&self, id: &str) -> Result<JobRecord, TransitionError> {
        self.transition(id, JobState::InProgress, |job| {
            job.progress = Some(JobProgress::new(
                0,
                JobPhase::Starting,
                JobPhase::Starting.to_string(),
            ));
        })
    }

    /// Records progress of a running job. Percent never goes backwards.
    pub fn update_progress(&self, id: &str, progress: JobProgress) -> Result<(), TransitionError> {
        let snapshot = {
            let mut jobs = self.write_jobs();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;
            if job.state != JobState::InProgress {
                return Err(TransitionError::NotRunning {
                    id: id.to_string(),
                    state: job.state,
                });
            }
            let floor = job.progress.as_ref().map(|p| p.percent).unwrap_or(0);
            job.progress = Some(JobProgress {
                percent: progress.percent.max(floor),
                ..progress
            });
            job.updated_at = Utc::now();
            job.clone()
        };

        self.publish(&snapshot);
        Ok(())
    }

    /// `InProgress → Succeeded`.
    pub fn succeed(&self, id: &str, output: JobOutput) -> Result<JobRecord, TransitionError> {
        self.transition(id, JobState::Succeeded, |job| {
            job.progress = Some(JobProgress::new(
                100,
                JobPhase::Completed,
                JobPhase::Completed.to_string(),
            ));
            job.output = Some(output);
        })
    }

    /// `InProgress → Failed`.
    pub fn fail(&self, id: &str, error: JobError) -> Result<JobRecord, TransitionError> {
        self.transition(id, JobState::Failed, |job| {
            let percent = job.progress.as_ref().map(|p| p.percent).unwrap_or(0);
            job.progress = Some(JobProgress::new(percent, JobPhase::Failed, error.message.clone()));
            job.error = Some(error);
        })
    }

    /// Looks a job up in memory, then in the database.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        if let Some(job) = self.read_jobs().get(id) {
            return Some(job.clone());
        }

        let db = self.db.as_ref()?;
        match job_repo::find_by_id(db, id) {
            Ok(Some(row)) => match from_row(&row) {
                Ok(job) => Some(job),
                Err(e) => {
                    log::warn!("Ignoring stored job {}: {}", id, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::error!("Failed to load job {} from database: {}", id, e);
                None
            }
        }
    }

    /// Jobs newest first. With a database attached, jobs evicted from memory
    /// are included.
    pub fn list(&self, filter: &JobListFilter) -> Vec<JobRecord> {
        let mut jobs: HashMap<String, JobRecord> = self
            .read_jobs()
            .values()
            .filter(|j| filter.state.map_or(true, |s| j.state == s))
            .map(|j| (j.id.clone(), j.clone()))
            .collect();

        if let Some(ref db) = self.db {
            let db_filter = JobFilter {
                state: filter.state.map(|s| s.as_str().to_string()),
                limit: filter.limit.map(|l| l as u64),
            };
            match job_repo::query(db, &db_filter) {
                Ok(rows) => {
                    for row in rows {
                        if jobs.contains_key(&row.id) {
                            continue;
                        }
                        match from_row(&row) {
                            Ok(job) => {
                                jobs.insert(job.id.clone(), job);
                            }
                            Err(e) => log::warn!("Ignoring stored job {}: {}", row.id, e),
                        }
                    }
                }
                Err(e) => log::error!("Failed to query jobs: {}", e),
            }
        }

        let mut jobs: Vec<JobRecord> = jobs.into_values().collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Drops terminal jobs that finished longer ago than the retention period.
    ///
    /// Returns the number of jobs removed from memory.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let removed = {
            let mut jobs = self.write_jobs();
            let before = jobs.len();
            jobs.retain(|_, job| job.finished_at.map_or(true, |t| t >= cutoff));
            before - jobs.len()
        };

        if let Some(ref db) = self.db {
            if let Err(e) = job_repo::delete_finished_before(db, &cutoff.to_rfc3339()) {
                log::error!("Failed to purge expired jobs: {}", e);
            }
        }

        if removed > 0 {
            log::info!("Purged {} expired job(s)", removed);
        }
        removed
    }

    /// Evicts the oldest terminal jobs from memory beyond `max_finished`.
    /// In-flight jobs are never evicted.
    fn enforce_max_finished(&self) {
        let mut jobs = self.write_jobs();
        let mut finished: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter_map(|j| j.finished_at.map(|t| (t, j.id.clone())))
            .collect();
        if finished.len() <= self.max_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_finished;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Number of jobs currently held in memory.
    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
