//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::{AppError, TransportableError};
use crate::job::{Batch, Job, JobKind, JobState, NewJob, StateUpdate, SubmitMode, Transition};
use crate::job_queue::JobQueue;
use crate::memory_queue::MemoryQueue;
use crate::models::{ChangeTrackingEntry, OutcomeRecord, RequestRecord};
use crate::traits::{AuditSink, ContentStore, JobExecutor};

// ---------------------------------------------------------------------------
// MockExecutor
// ---------------------------------------------------------------------------

/// What every [`MockExecutor`] call yields.
#[derive(Clone)]
enum Scripted {
    Ok(serde_json::Value),
    Classified(TransportableError),
    Unclassified(String),
}

/// Mock executor that returns a configurable result for every job.
#[derive(Clone)]
pub struct MockExecutor {
    outcome: Scripted,
    calls: Arc<Mutex<Vec<Uuid>>>,
}

impl MockExecutor {
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            outcome: Scripted::Ok(result),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        let outcome = match error {
            AppError::Transportable(e) => Scripted::Classified(e),
            other => Scripted::Unclassified(other.to_string()),
        };
        Self {
            outcome,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ids of the jobs executed so far.
    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

impl JobExecutor for MockExecutor {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, AppError> {
        self.calls.lock().unwrap().push(job.id);
        match &self.outcome {
            Scripted::Ok(result) => Ok(result.clone()),
            Scripted::Classified(e) => Err(e.clone().into()),
            Scripted::Unclassified(message) => Err(AppError::Internal(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock audit sink that records every insert.
#[derive(Clone, Default)]
pub struct MockSink {
    requests: Arc<Mutex<Vec<RequestRecord>>>,
    outcomes: Arc<Mutex<Vec<OutcomeRecord>>>,
    changes: Arc<Mutex<Vec<ChangeTrackingEntry>>>,
    fail_change_tracking: bool,
    outcome_failures: Arc<AtomicUsize>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change tracking inserts fail; everything else succeeds.
    pub fn failing_change_tracking(mut self) -> Self {
        self.fail_change_tracking = true;
        self
    }

    /// The next `count` outcome inserts fail, as a flaky database would.
    pub fn failing_outcomes(self, count: usize) -> Self {
        self.outcome_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<OutcomeRecord> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn changes(&self) -> Vec<ChangeTrackingEntry> {
        self.changes.lock().unwrap().clone()
    }
}

impl AuditSink for MockSink {
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), AppError> {
        self.requests.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn insert_outcome(&self, record: &OutcomeRecord) -> Result<(), AppError> {
        let failed = self
            .outcome_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::DatabaseError("connection reset by peer".into()));
        }
        self.outcomes.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn track_change(&self, entry: &ChangeTrackingEntry) -> Result<(), AppError> {
        if self.fail_change_tracking {
            return Err(AppError::DatabaseError(
                "function change_tracking_insert_scrape does not exist".into(),
            ));
        }
        self.changes.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockContentStore
// ---------------------------------------------------------------------------

/// Mock content store that records what was saved.
#[derive(Clone, Default)]
pub struct MockContentStore {
    saved: Arc<Mutex<Vec<(JobKind, Uuid)>>>,
    failing: bool,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<(JobKind, Uuid)> {
        self.saved.lock().unwrap().clone()
    }
}

impl ContentStore for MockContentStore {
    async fn save(
        &self,
        kind: JobKind,
        id: Uuid,
        _content: &serde_json::Value,
    ) -> Result<(), AppError> {
        if self.failing {
            return Err(AppError::ContentStoreError("bucket unavailable".into()));
        }
        self.saved.lock().unwrap().push((kind, id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingQueue
// ---------------------------------------------------------------------------

/// [`MemoryQueue`] whose `fail_on`-th enqueue (1-based) fails.
#[derive(Clone)]
pub struct FailingQueue {
    inner: MemoryQueue,
    fail_on: usize,
    attempts: Arc<AtomicUsize>,
    enqueued: Arc<Mutex<Vec<Uuid>>>,
    batches: Arc<Mutex<Vec<Uuid>>>,
}

impl FailingQueue {
    pub fn new(fail_on: usize) -> Self {
        Self {
            inner: MemoryQueue::new(),
            fail_on,
            attempts: Arc::default(),
            enqueued: Arc::default(),
            batches: Arc::default(),
        }
    }

    /// Ids of the jobs that were accepted.
    pub fn enqueued(&self) -> Vec<Uuid> {
        self.enqueued.lock().unwrap().clone()
    }

    /// Ids of every batch ever created.
    pub fn batches_created(&self) -> Vec<Uuid> {
        self.batches.lock().unwrap().clone()
    }
}

impl JobQueue for FailingQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on {
            return Err(AppError::DatabaseError("too many connections".into()));
        }
        self.inner.enqueue(job).await?;
        self.enqueued.lock().unwrap().push(job.id);
        Ok(())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, AppError> {
        self.inner.claim_next(worker_id).await
    }

    async fn transition(&self, job_id: Uuid, update: StateUpdate) -> Result<Transition, AppError> {
        self.inner.transition(job_id, update).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.inner.get_job(job_id).await
    }

    async fn peek_state(&self, job_id: Uuid) -> Result<Option<JobState>, AppError> {
        self.inner.peek_state(job_id).await
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool, AppError> {
        self.inner.remove(job_id).await
    }

    async fn create_batch(&self, batch: &Batch) -> Result<(), AppError> {
        self.inner.create_batch(batch).await?;
        self.batches.lock().unwrap().push(batch.id);
        Ok(())
    }

    async fn remove_batch(&self, batch_id: Uuid) -> Result<bool, AppError> {
        self.inner.remove_batch(batch_id).await
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, AppError> {
        self.inner.get_batch(batch_id).await
    }

    async fn mark_batch_cancelled(&self, batch_id: Uuid) -> Result<(), AppError> {
        self.inner.mark_batch_cancelled(batch_id).await
    }

    async fn admitted_load(&self, team_id: &str) -> Result<u64, AppError> {
        self.inner.admitted_load(team_id).await
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64, AppError> {
        self.inner.count_by_state(state).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A queued scrape job with a fresh id.
pub fn make_test_job() -> Job {
    Job::from_request(
        NewJob::new(
            JobKind::Scrape,
            "test-team",
            serde_json::json!({"url": "https://example.com"}),
        ),
        10,
        SubmitMode::Admitted,
    )
}
