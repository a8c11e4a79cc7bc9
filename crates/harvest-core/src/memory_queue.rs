use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Batch, Job, JobState, StateUpdate, Transition};
use crate::job_queue::JobQueue;

/// Heap key: (priority, submission sequence, job id), smallest first.
type ReadyKey = Reverse<(i32, u64, Uuid)>;

/// In-process queue backend.
///
/// Jobs live in a sharded map, so a transition only locks the shard holding
/// that job. The ready heap is a separate index that is cleaned lazily: entries
/// for jobs that were cancelled or removed are skipped when popped.
///
/// Lock order is always heap, then map shard.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: DashMap<Uuid, Job>,
    batches: DashMap<Uuid, Batch>,
    ready: Mutex<BinaryHeap<ReadyKey>>,
    seq: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_ready(&self, job: &Job) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Reverse((job.priority, seq, job.id)));
    }

    fn claim_sync(&self, worker_id: &str) -> Option<Job> {
        let mut ready = self
            .inner
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while let Some(Reverse((_, _, id))) = ready.pop() {
            let Some(mut job) = self.inner.jobs.get_mut(&id) else {
                continue;
            };
            if job.state != JobState::Queued {
                continue;
            }
            StateUpdate::Activate {
                worker_id: worker_id.to_string(),
            }
            .apply(&mut job);
            return Some(job.clone());
        }
        None
    }

    fn transition_sync(&self, job_id: Uuid, update: StateUpdate) -> Result<Transition, AppError> {
        let mut job = self
            .inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

        if !update.sources().contains(&job.state) {
            return Ok(Transition::Rejected { current: job.state });
        }
        update.apply(&mut job);
        Ok(Transition::Applied(job.clone()))
    }
}

impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        match self.inner.jobs.entry(job.id) {
            Entry::Occupied(_) => {
                return Err(AppError::Validation(format!(
                    "Job {} already exists",
                    job.id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }
        if job.state == JobState::Queued {
            self.push_ready(job);
        }
        Ok(())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, AppError> {
        Ok(self.claim_sync(worker_id))
    }

    async fn transition(&self, job_id: Uuid, update: StateUpdate) -> Result<Transition, AppError> {
        self.transition_sync(job_id, update)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.inner.jobs.get(&job_id).map(|job| job.clone()))
    }

    async fn peek_state(&self, job_id: Uuid) -> Result<Option<JobState>, AppError> {
        Ok(self.inner.jobs.get(&job_id).map(|job| job.state))
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool, AppError> {
        Ok(self.inner.jobs.remove(&job_id).is_some())
    }

    async fn create_batch(&self, batch: &Batch) -> Result<(), AppError> {
        match self.inner.batches.entry(batch.id) {
            Entry::Occupied(_) => Err(AppError::Validation(format!(
                "Batch {} already exists",
                batch.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(batch.clone());
                Ok(())
            }
        }
    }

    async fn remove_batch(&self, batch_id: Uuid) -> Result<bool, AppError> {
        Ok(self.inner.batches.remove(&batch_id).is_some())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, AppError> {
        Ok(self.inner.batches.get(&batch_id).map(|b| b.clone()))
    }

    async fn mark_batch_cancelled(&self, batch_id: Uuid) -> Result<(), AppError> {
        let mut batch = self
            .inner
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| AppError::NotFound(format!("Batch not found: {batch_id}")))?;
        batch.cancelled = true;
        Ok(())
    }

    async fn admitted_load(&self, team_id: &str) -> Result<u64, AppError> {
        let count = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.team_id == team_id && j.admitted && !j.state.is_terminal())
            .count();
        Ok(count as u64)
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64, AppError> {
        Ok(self.inner.jobs.iter().filter(|j| j.state == state).count() as i64)
    }
}
