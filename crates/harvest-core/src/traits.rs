use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobKind};
use crate::models::{ChangeTrackingEntry, OutcomeRecord, RequestRecord};

/// Executes a claimed job. Implemented by the fetch/render engines.
pub trait JobExecutor: Send + Sync + Clone {
    /// Run the job and return its result payload.
    ///
    /// Errors are classified with [`AppError::into_transportable`] before
    /// they are stored on the job.
    fn execute(&self, job: &Job) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}

/// Insert-only persistence for request and outcome records.
pub trait AuditSink: Send + Sync + Clone {
    fn insert_request(
        &self,
        record: &RequestRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn insert_outcome(
        &self,
        record: &OutcomeRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record a scrape in the change-tracking history.
    fn track_change(
        &self,
        entry: &ChangeTrackingEntry,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Blob store for full result payloads (documents, search results, ...).
pub trait ContentStore: Send + Sync + Clone {
    fn save(
        &self,
        kind: JobKind,
        id: Uuid,
        content: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
