//! Job state machine and transition notifications.
//!
//! All state changes go through [`JobLifecycle`], which applies them to the
//! backend as compare-and-swap updates and publishes a [`JobSignal`] on the
//! job's watch channel for every transition that wins.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{AppError, TransportableError};
use crate::job::{
    Batch, Job, JobOutcome, JobState, NewBatch, NewJob, StateUpdate, SubmitMode, Transition,
};
use crate::job_queue::JobQueue;

/// Latest known state of a job, as published to waiters.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSignal {
    pub state: JobState,
    /// Present once the job is terminal.
    pub outcome: Option<JobOutcome>,
}

impl JobSignal {
    pub fn of(job: &Job) -> Self {
        Self {
            state: job.state,
            outcome: job.outcome(),
        }
    }
}

/// Per-job watch channels.
///
/// A channel is opened when a job is submitted in this process. It is closed
/// when this process publishes the terminal signal, or through
/// [`JobLifecycle::forget`] once a reader saw the job finish elsewhere.
/// Receivers keep the last value after the sender is gone, so late readers
/// still see the outcome.
#[derive(Default)]
struct Notifier {
    channels: DashMap<Uuid, watch::Sender<JobSignal>>,
}

impl Notifier {
    fn open(&self, job: &Job) {
        let (tx, _) = watch::channel(JobSignal::of(job));
        self.channels.insert(job.id, tx);
    }

    fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobSignal>> {
        self.channels.get(&job_id).map(|tx| tx.subscribe())
    }

    fn publish(&self, job: &Job) {
        let signal = JobSignal::of(job);
        if job.state.is_terminal() {
            if let Some((_, tx)) = self.channels.remove(&job.id) {
                tx.send_replace(signal);
            }
        } else if let Some(tx) = self.channels.get(&job.id) {
            tx.send_replace(signal);
        }
    }

    fn close(&self, job_id: Uuid) {
        self.channels.remove(&job_id);
    }
}

/// Owns the job state machine on top of a [`JobQueue`] backend.
#[derive(Clone)]
pub struct JobLifecycle<Q: JobQueue> {
    queue: Q,
    notifier: Arc<Notifier>,
}

impl<Q: JobQueue> JobLifecycle<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            notifier: Arc::new(Notifier::default()),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Enqueue a job and register it at `queued`.
    pub async fn submit(
        &self,
        request: NewJob,
        priority: i32,
        mode: SubmitMode,
    ) -> Result<Job, AppError> {
        let job = Job::from_request(request, priority, mode);
        // Open the channel first so a worker finishing immediately is never missed.
        self.notifier.open(&job);
        if let Err(e) = self.queue.enqueue(&job).await {
            self.notifier.close(job.id);
            return Err(e);
        }
        tracing::debug!(job_id = %job.id, kind = %job.kind, priority, ?mode, "Job submitted");
        Ok(job)
    }

    /// Create a batch and submit one child job per payload.
    pub async fn submit_batch(
        &self,
        request: NewBatch,
        priority: i32,
        mode: SubmitMode,
    ) -> Result<(Batch, Vec<Job>), AppError> {
        let NewBatch {
            kind,
            child_kind,
            team_id,
            zero_data_retention,
            payloads,
        } = request;
        if payloads.is_empty() {
            return Err(AppError::Validation(
                "A batch needs at least one job".to_string(),
            ));
        }

        let requests: Vec<NewJob> = payloads
            .into_iter()
            .map(|payload| {
                NewJob::new(child_kind, team_id.as_str(), payload)
                    .with_id(Uuid::new_v4())
                    .with_zero_data_retention(zero_data_retention)
            })
            .collect();

        let batch = Batch {
            id: Uuid::new_v4(),
            kind,
            team_id,
            zero_data_retention,
            job_ids: requests.iter().filter_map(|r| r.id).collect(),
            cancelled: false,
            created_at: chrono::Utc::now(),
        };
        self.queue.create_batch(&batch).await?;

        let mut jobs = Vec::with_capacity(requests.len());
        for request in requests {
            match self.submit(request.in_batch(batch.id), priority, mode).await {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    self.withdraw(&batch, &jobs).await;
                    return Err(e);
                }
            }
        }

        tracing::info!(batch_id = %batch.id, %kind, jobs = jobs.len(), "Batch submitted");
        Ok((batch, jobs))
    }

    /// Undo a partially submitted batch: its enqueued children and the
    /// batch record are deleted so no worker runs unbilled work.
    async fn withdraw(&self, batch: &Batch, jobs: &[Job]) {
        for job in jobs {
            if let Err(e) = self.remove(job.id).await {
                tracing::warn!(job_id = %job.id, batch_id = %batch.id, error = %e, "Failed to withdraw batch job");
            }
        }
        if let Err(e) = self.queue.remove_batch(batch.id).await {
            tracing::warn!(batch_id = %batch.id, error = %e, "Failed to withdraw batch");
        }
        tracing::warn!(batch_id = %batch.id, withdrawn = jobs.len(), "Batch submission failed");
    }

    /// queued -> active for the best available job. First claimant wins.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>, AppError> {
        let job = self.queue.claim_next(worker_id).await?;
        if let Some(job) = &job {
            self.notifier.publish(job);
        }
        Ok(job)
    }

    /// active -> completed.
    pub async fn complete(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Transition, AppError> {
        self.apply(job_id, StateUpdate::Complete { result }).await
    }

    /// active -> failed, carrying the classified error.
    pub async fn fail(
        &self,
        job_id: Uuid,
        error: TransportableError,
    ) -> Result<Transition, AppError> {
        self.apply(job_id, StateUpdate::Fail { error }).await
    }

    /// queued|active -> cancelled. Rejected once the job completed or failed.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Transition, AppError> {
        self.apply(job_id, StateUpdate::Cancel).await
    }

    async fn apply(&self, job_id: Uuid, update: StateUpdate) -> Result<Transition, AppError> {
        let target = update.target();
        let transition = self.queue.transition(job_id, update).await?;
        match &transition {
            Transition::Applied(job) => {
                tracing::debug!(%job_id, state = %job.state, "Job transitioned");
                self.notifier.publish(job);
            }
            Transition::Rejected { current } => {
                tracing::debug!(%job_id, %current, %target, "Transition rejected");
            }
        }
        Ok(transition)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.queue.get_job(job_id).await
    }

    pub async fn state(&self, job_id: Uuid) -> Result<Option<JobState>, AppError> {
        self.queue.peek_state(job_id).await
    }

    /// Best-effort removal from the backend. Does not stop a running worker.
    pub async fn remove(&self, job_id: Uuid) -> Result<bool, AppError> {
        self.notifier.close(job_id);
        self.queue.remove(job_id).await
    }

    /// Drop the job's channel without touching the backend.
    ///
    /// For jobs seen terminal through a backend read, which happens when a
    /// worker in another process finished them.
    pub fn forget(&self, job_id: Uuid) {
        self.notifier.close(job_id);
    }

    /// Receiver for a job submitted by this process, if still open.
    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobSignal>> {
        self.notifier.subscribe(job_id)
    }
}
