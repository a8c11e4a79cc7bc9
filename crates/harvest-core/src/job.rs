use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportableError;

/// Kind of operation a job (or request) performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scrape,
    Crawl,
    BatchScrape,
    Search,
    Extract,
    Map,
    Llmstxt,
    DeepResearch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Scrape => "scrape",
            JobKind::Crawl => "crawl",
            JobKind::BatchScrape => "batch_scrape",
            JobKind::Search => "search",
            JobKind::Extract => "extract",
            JobKind::Map => "map",
            JobKind::Llmstxt => "llmstxt",
            JobKind::DeepResearch => "deep_research",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(JobKind::Scrape),
            "crawl" => Ok(JobKind::Crawl),
            "batch_scrape" => Ok(JobKind::BatchScrape),
            "search" => Ok(JobKind::Search),
            "extract" => Ok(JobKind::Extract),
            "map" => Ok(JobKind::Map),
            "llmstxt" => Ok(JobKind::Llmstxt),
            "deep_research" => Ok(JobKind::DeepResearch),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

/// State of a job in its lifecycle.
///
/// ```text
/// queued --claim--> active --complete--> completed
///    |                 |----fail------> failed
///    +------cancel-----+--------------> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
                | (JobState::Queued, JobState::Cancelled)
                | (JobState::Active, JobState::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    /// Lower values are served first.
    pub priority: i32,
    pub payload: serde_json::Value,
    pub team_id: String,
    pub zero_data_retention: bool,
    pub batch_id: Option<Uuid>,
    /// False for direct submissions, which skip admission accounting.
    pub admitted: bool,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TransportableError>,
}

impl Job {
    /// Build a queued job from a submission request.
    pub fn from_request(request: NewJob, priority: i32, mode: SubmitMode) -> Self {
        Self {
            id: request.id.unwrap_or_else(Uuid::new_v4),
            kind: request.kind,
            priority,
            payload: request.payload,
            team_id: request.team_id,
            zero_data_retention: request.zero_data_retention,
            batch_id: request.batch_id,
            admitted: mode == SubmitMode::Admitted,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
            error: None,
        }
    }

    /// The terminal outcome of this job, if it has one.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.state {
            JobState::Completed => Some(JobOutcome::Completed(
                self.result.clone().unwrap_or(serde_json::Value::Null),
            )),
            JobState::Failed => Some(JobOutcome::Failed(self.error.clone().unwrap_or_else(
                || TransportableError::new(crate::error::ErrorCode::ScrapeFailed, "Job failed"),
            ))),
            JobState::Cancelled => Some(JobOutcome::Cancelled),
            JobState::Queued | JobState::Active => None,
        }
    }
}

/// How a job enters the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Regular path: the job counts toward its team's admitted load.
    #[default]
    Admitted,
    /// Preview/ungated path: pushed straight to the backend without accounting.
    Direct,
}

/// Request to submit a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Option<Uuid>,
    pub kind: JobKind,
    pub team_id: String,
    pub payload: serde_json::Value,
    pub zero_data_retention: bool,
    pub batch_id: Option<Uuid>,
}

impl NewJob {
    pub fn new(kind: JobKind, team_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            kind,
            team_id: team_id.into(),
            payload,
            zero_data_retention: false,
            batch_id: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_zero_data_retention(mut self, zdr: bool) -> Self {
        self.zero_data_retention = zdr;
        self
    }

    pub fn in_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// Request to submit a batch of jobs.
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// `batch_scrape` or `crawl`.
    pub kind: JobKind,
    /// Kind of every child job.
    pub child_kind: JobKind,
    pub team_id: String,
    pub zero_data_retention: bool,
    pub payloads: Vec<serde_json::Value>,
}

impl NewBatch {
    pub fn new(kind: JobKind, team_id: impl Into<String>, payloads: Vec<serde_json::Value>) -> Self {
        Self {
            kind,
            child_kind: JobKind::Scrape,
            team_id: team_id.into(),
            zero_data_retention: false,
            payloads,
        }
    }

    pub fn with_zero_data_retention(mut self, zdr: bool) -> Self {
        self.zero_data_retention = zdr;
        self
    }
}

/// A group of jobs submitted together and cancelled as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub kind: JobKind,
    pub team_id: String,
    pub zero_data_retention: bool,
    pub job_ids: Vec<Uuid>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

/// A state change requested against the backend.
///
/// Each update names its target state; the allowed source states follow
/// from [`JobState::can_transition_to`].
#[derive(Debug, Clone)]
pub enum StateUpdate {
    Activate { worker_id: String },
    Complete { result: serde_json::Value },
    Fail { error: TransportableError },
    Cancel,
}

impl StateUpdate {
    pub fn target(&self) -> JobState {
        match self {
            StateUpdate::Activate { .. } => JobState::Active,
            StateUpdate::Complete { .. } => JobState::Completed,
            StateUpdate::Fail { .. } => JobState::Failed,
            StateUpdate::Cancel => JobState::Cancelled,
        }
    }

    /// States from which this update may be applied.
    pub fn sources(&self) -> &'static [JobState] {
        match self {
            StateUpdate::Activate { .. } => &[JobState::Queued],
            StateUpdate::Complete { .. } | StateUpdate::Fail { .. } => &[JobState::Active],
            StateUpdate::Cancel => &[JobState::Queued, JobState::Active],
        }
    }

    /// Apply this update to an in-memory job, stamping timestamps.
    ///
    /// The caller is responsible for checking that the current state is
    /// one of [`sources`](Self::sources).
    pub fn apply(self, job: &mut Job) {
        let now = Utc::now();
        job.state = self.target();
        match self {
            StateUpdate::Activate { worker_id } => {
                job.worker_id = Some(worker_id);
                job.started_at = Some(now);
            }
            StateUpdate::Complete { result } => {
                job.result = Some(result);
                job.finished_at = Some(now);
            }
            StateUpdate::Fail { error } => {
                job.error = Some(error);
                job.finished_at = Some(now);
            }
            StateUpdate::Cancel => {
                job.finished_at = Some(now);
            }
        }
    }
}

/// Result of a compare-and-swap state transition.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The transition won; carries the job as it is now.
    Applied(Job),
    /// The job was not in an allowed source state.
    Rejected { current: JobState },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Final outcome of a job, as observed by waiters.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(serde_json::Value),
    Failed(TransportableError),
    Cancelled,
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
