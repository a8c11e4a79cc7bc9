use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use harvest_core::{BatchProgress, Job, TransportableError};

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeResponse {
    pub success: bool,
    /// The scraped document.
    pub data: serde_json::Value,
    pub credits_used: u64,
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchScrapeResponse {
    pub success: bool,
    pub id: Uuid,
    /// Path to poll for progress.
    pub url: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchStatusResponse {
    pub success: bool,
    /// `scraping`, `completed` or `cancelled`.
    pub status: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub credits_used: u64,
    pub data: Vec<serde_json::Value>,
}

impl From<BatchProgress> for BatchStatusResponse {
    fn from(progress: BatchProgress) -> Self {
        Self {
            success: true,
            status: progress.status.as_str().to_string(),
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
            cancelled: progress.cancelled,
            credits_used: progress.credits_used,
            data: progress.data,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<TransportableError> for JobErrorResponse {
    fn from(error: TransportableError) -> Self {
        Self {
            code: error.code.to_string(),
            message: error.message,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub kind: String,
    pub state: String,
    pub priority: i32,
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobErrorResponse>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.to_string(),
            state: job.state.to_string(),
            priority: job.priority,
            batch_id: job.batch_id,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            worker_id: job.worker_id,
            result: job.result,
            error: job.error.map(Into::into),
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Jobs waiting for a worker; absent when the database is unreachable.
    pub queued: Option<i64>,
    pub active: Option<i64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Body for classified job failures (timeouts, engine errors).
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FailureResponse {
    pub success: bool,
    pub code: String,
    pub error: String,
}

/// Body for a cancel that arrived after every job finished.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ConflictResponse {
    pub error: String,
}
