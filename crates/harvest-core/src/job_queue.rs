use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Batch, Job, JobState, StateUpdate, Transition};

/// Priority queue backend for jobs and batches.
///
/// Ordering: lowest `priority` first, ties broken by submission order.
/// State changes go exclusively through [`transition`](Self::transition),
/// which must be an atomic compare-and-swap against the job's current state
/// (e.g. `UPDATE ... WHERE state = ANY(...)`), scoped to one job id.
pub trait JobQueue: Send + Sync + Clone + 'static {
    fn enqueue(&self, job: &Job) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically move the best queued job to `active` and return it.
    ///
    /// Returns `None` if nothing is queued.
    fn claim_next(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Apply `update` if the job is in one of the update's source states.
    ///
    /// Fails with [`AppError::NotFound`] if the job does not exist.
    fn transition(
        &self,
        job_id: Uuid,
        update: StateUpdate,
    ) -> impl Future<Output = Result<Transition, AppError>> + Send;

    fn get_job(&self, job_id: Uuid) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    fn peek_state(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<JobState>, AppError>> + Send;

    /// Delete a job. Returns false if it was already gone.
    fn remove(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn create_batch(&self, batch: &Batch) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Delete a batch record. Its jobs are not touched.
    fn remove_batch(&self, batch_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn get_batch(
        &self,
        batch_id: Uuid,
    ) -> impl Future<Output = Result<Option<Batch>, AppError>> + Send;

    fn mark_batch_cancelled(
        &self,
        batch_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Non-terminal admitted jobs of a team (direct submissions are not counted).
    fn admitted_load(&self, team_id: &str) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn count_by_state(&self, state: JobState)
    -> impl Future<Output = Result<i64, AppError>> + Send;
}
