use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, JobError};
use crate::fingerprint::Fingerprint;
use crate::strategy::StrategyId;

/// Lifecycle state of a job.
///
/// `Pending → InProgress → {Succeeded | Failed}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::InProgress => "InProgress",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(JobState::Pending),
            "InProgress" => Some(JobState::InProgress),
            "Succeeded" => Some(JobState::Succeeded),
            "Failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::InProgress)
                | (JobState::InProgress, JobState::Succeeded)
                | (JobState::InProgress, JobState::Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-stage of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Starting,
    CacheLookup,
    Extracting,
    Caching,
    Augmenting,
    Storing,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Starting => "starting",
            JobPhase::CacheLookup => "cache_lookup",
            JobPhase::Extracting => "extracting",
            JobPhase::Caching => "caching",
            JobPhase::Augmenting => "augmenting",
            JobPhase::Storing => "storing",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            JobPhase::Queued,
            JobPhase::Starting,
            JobPhase::CacheLookup,
            JobPhase::Extracting,
            JobPhase::Caching,
            JobPhase::Augmenting,
            JobPhase::Storing,
            JobPhase::Completed,
            JobPhase::Failed,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Starting => write!(f, "Starting"),
            JobPhase::CacheLookup => write!(f, "Checking cache"),
            JobPhase::Extracting => write!(f, "Extracting text"),
            JobPhase::Caching => write!(f, "Caching result"),
            JobPhase::Augmenting => write!(f, "Post-processing"),
            JobPhase::Storing => write!(f, "Storing result"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress of a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// 0..=100
    pub percent: u8,
    pub phase: JobPhase,
    pub message: String,
}

impl JobProgress {
    pub fn new(percent: u8, phase: JobPhase, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            phase,
            message: message.into(),
        }
    }
}

/// Non-fatal problem attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWarning {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobWarning {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Final text: the generation output when augmentation ran, else the extraction.
    pub text: String,
    /// Raw extraction, before augmentation.
    pub extracted_text: String,
    pub strategy: StrategyId,
    pub fingerprint: Fingerprint,
    pub cache_hit: bool,
    pub augmented: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<JobWarning>,
}

/// Everything the store knows about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub strategy: StrategyId,
    pub state: JobState,
    /// Present once the job has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, strategy: StrategyId) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            strategy,
            state: JobState::Pending,
            progress: None,
            submitted_at: now,
            updated_at: now,
            finished_at: None,
            output: None,
            error: None,
        }
    }

    /// Time since submission, or until completion for finished jobs.
    pub fn elapsed(&self) -> std::time::Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.submitted_at).to_std().unwrap_or_default()
    }

    /// The state-dependent view returned to pollers.
    pub fn status(&self) -> JobStatus {
        match self.state {
            JobState::Pending => JobStatus::Pending {
                submitted_at: self.submitted_at,
            },
            JobState::InProgress => JobStatus::InProgress {
                progress: self.progress.clone().unwrap_or_else(|| {
                    JobProgress::new(0, JobPhase::Starting, JobPhase::Starting.to_string())
                }),
                elapsed_ms: self.elapsed().as_millis() as u64,
            },
            JobState::Succeeded => match self.output {
                Some(ref output) => JobStatus::Succeeded {
                    result: output.clone(),
                },
                None => JobStatus::Failed {
                    error: JobError::new(ErrorKind::PersistenceFailure, "job result was lost"),
                },
            },
            JobState::Failed => JobStatus::Failed {
                error: self.error.clone().unwrap_or_else(|| {
                    JobError::new(ErrorKind::ExtractionFailure, "job failed without detail")
                }),
            },
        }
    }
}

/// Polling response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum JobStatus {
    Pending {
        submitted_at: DateTime<Utc>,
    },
    InProgress {
        progress: JobProgress,
        elapsed_ms: u64,
    },
    Succeeded {
        result: JobOutput,
    },
    Failed {
        error: JobError,
    },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Pending { .. } => JobState::Pending,
            JobStatus::InProgress { .. } => JobState::InProgress,
            JobStatus::Succeeded { .. } => JobState::Succeeded,
            JobStatus::Failed { .. } => JobState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use JobState::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Pending));
        for terminal in [Succeeded, Failed] {
            for next in [Pending, InProgress, Succeeded, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_state_and_phase_names_round_trip() {
        for state in [
            JobState::Pending,
            JobState::InProgress,
            JobState::Succeeded,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobPhase::parse("cache_lookup"), Some(JobPhase::CacheLookup));
        assert_eq!(JobPhase::parse("bogus"), None);
    }

    #[test]
    fn test_progress_percent_is_clamped() {
        assert_eq!(JobProgress::new(250, JobPhase::Extracting, "x").percent, 100);
    }

    #[test]
    fn test_status_views() {
        let mut job = JobRecord::new("j1", StrategyId::Marker);
        assert!(matches!(job.status(), JobStatus::Pending { .. }));

        job.state = JobState::InProgress;
        job.progress = Some(JobProgress::new(30, JobPhase::Extracting, "Extracting"));
        match job.status() {
            JobStatus::InProgress { progress, .. } => assert_eq!(progress.percent, 30),
            other => panic!("unexpected {:?}", other),
        }

        job.state = JobState::Failed;
        job.error = Some(JobError::new(ErrorKind::Timeout, "too slow"));
        match job.status() {
            JobStatus::Failed { error } => assert_eq!(error.kind, ErrorKind::Timeout),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_serializes_with_state_tag() {
        let job = JobRecord::new("j1", StrategyId::Marker);
        let json = serde_json::to_value(job.status()).unwrap();
        assert_eq!(json["state"], "Pending");
    }
}
