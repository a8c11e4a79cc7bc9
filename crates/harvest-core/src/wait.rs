//! Blocking wait-for-completion.
//!
//! A waiter listens on the job's watch channel and, in parallel, polls the
//! backend with exponential backoff. The poll covers jobs finished by a
//! worker in another process and any notification that was missed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until};
use uuid::Uuid;

use crate::error::{AppError, TransportableError};
use crate::job::JobOutcome;
use crate::job_queue::JobQueue;
use crate::lifecycle::{JobLifecycle, JobSignal};
use crate::options::ScrapeOptions;

#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// First backend poll interval.
    pub poll_initial: Duration,
    /// Upper bound for the backoff.
    pub poll_max: Duration,
    /// Hard cap on any single wait. `None` means uncapped.
    pub max_wait: Option<Duration>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_initial: Duration::from_millis(50),
            poll_max: Duration::from_secs(1),
            max_wait: None,
        }
    }
}

#[derive(Clone)]
pub struct WaitCoordinator<Q: JobQueue> {
    lifecycle: JobLifecycle<Q>,
    config: WaitConfig,
}

impl<Q: JobQueue> WaitCoordinator<Q> {
    pub fn new(lifecycle: JobLifecycle<Q>, config: WaitConfig) -> Self {
        Self { lifecycle, config }
    }

    /// Declared timeout plus the time the job itself spends waiting, capped
    /// by `max_wait` when set.
    pub fn effective_timeout(
        &self,
        timeout: Option<Duration>,
        payload: &serde_json::Value,
    ) -> Option<Duration> {
        let in_job = ScrapeOptions::from_payload(payload).in_job_wait();
        let total = timeout.map(|t| t.saturating_add(in_job));
        match (total, self.config.max_wait) {
            (Some(total), Some(cap)) => Some(total.min(cap)),
            (None, cap) => cap,
            (total, None) => total,
        }
    }

    /// Block until the job is terminal or the deadline passes.
    ///
    /// Completed jobs yield their result payload unchanged. Failed jobs yield
    /// the worker's classified error, cancelled jobs `JOB_CANCELLED`. On
    /// deadline the job is removed (best effort) and `SCRAPE_TIMEOUT` is
    /// returned. `None` waits indefinitely.
    pub async fn wait_for_job(
        &self,
        job_id: Uuid,
        timeout: Option<Duration>,
        zero_data_retention: bool,
    ) -> Result<serde_json::Value, AppError> {
        let result = self.wait(job_id, timeout, zero_data_retention).await;
        // The job is terminal or gone; a remote worker never closes our channel.
        if matches!(
            result,
            Ok(_) | Err(AppError::Transportable(_)) | Err(AppError::NotFound(_))
        ) {
            self.lifecycle.forget(job_id);
        }
        result
    }

    async fn wait(
        &self,
        job_id: Uuid,
        timeout: Option<Duration>,
        zero_data_retention: bool,
    ) -> Result<serde_json::Value, AppError> {
        // Subscribe before the first read so no transition falls in between.
        let mut rx = self.lifecycle.subscribe(job_id);
        let job = self
            .lifecycle
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

        let started = Instant::now();
        let deadline = self
            .effective_timeout(timeout, &job.payload)
            .map(|limit| started + limit);

        if let Some(outcome) = job.outcome() {
            return resolve(job_id, outcome, zero_data_retention);
        }

        let mut backoff = self.config.poll_initial;
        loop {
            tokio::select! {
                signal = next_signal(&mut rx) => {
                    if let Some(outcome) = signal.and_then(|s| s.outcome) {
                        return resolve(job_id, outcome, zero_data_retention);
                    }
                }
                _ = sleep(backoff) => {
                    backoff = (backoff * 2).min(self.config.poll_max);
                    if let Some(outcome) = self.check(job_id, &rx).await? {
                        return resolve(job_id, outcome, zero_data_retention);
                    }
                }
                _ = until(deadline) => {
                    return self.expire(job_id, &rx, started, zero_data_retention).await;
                }
            }
        }
    }

    async fn check(
        &self,
        job_id: Uuid,
        rx: &Option<watch::Receiver<JobSignal>>,
    ) -> Result<Option<JobOutcome>, AppError> {
        if let Some(outcome) = latest_outcome(rx) {
            return Ok(Some(outcome));
        }
        match self.lifecycle.get_job(job_id).await? {
            Some(job) => Ok(job.outcome()),
            None => Err(AppError::NotFound(format!(
                "Job {job_id} was removed before it finished"
            ))),
        }
    }

    async fn expire(
        &self,
        job_id: Uuid,
        rx: &Option<watch::Receiver<JobSignal>>,
        started: Instant,
        zero_data_retention: bool,
    ) -> Result<serde_json::Value, AppError> {
        // Last look: the job may have finished right at the deadline.
        if let Some(outcome) = latest_outcome(rx) {
            return resolve(job_id, outcome, zero_data_retention);
        }
        match self.lifecycle.get_job(job_id).await {
            Ok(Some(job)) => {
                if let Some(outcome) = job.outcome() {
                    return resolve(job_id, outcome, zero_data_retention);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%job_id, error = %e, "Final state check failed"),
        }

        if let Err(e) = self.lifecycle.remove(job_id).await {
            tracing::warn!(%job_id, error = %e, "Failed to remove timed out job");
        }

        let waited_ms = started.elapsed().as_millis() as u64;
        tracing::info!(%job_id, waited_ms, "Wait timed out");
        Err(TransportableError::timeout(waited_ms).into())
    }
}

/// Next published signal, or `None` once the channel is gone.
///
/// A missing or closed channel never resolves again; the poll takes over.
async fn next_signal(rx: &mut Option<watch::Receiver<JobSignal>>) -> Option<JobSignal> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match receiver.changed().await {
        Ok(()) => Some(receiver.borrow_and_update().clone()),
        Err(_) => {
            *rx = None;
            None
        }
    }
}

fn latest_outcome(rx: &Option<watch::Receiver<JobSignal>>) -> Option<JobOutcome> {
    rx.as_ref().and_then(|r| r.borrow().outcome.clone())
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn resolve(
    job_id: Uuid,
    outcome: JobOutcome,
    zero_data_retention: bool,
) -> Result<serde_json::Value, AppError> {
    match outcome {
        JobOutcome::Completed(result) => {
            if zero_data_retention {
                tracing::debug!(%job_id, "Job completed");
            } else {
                tracing::debug!(%job_id, result_bytes = result.to_string().len(), "Job completed");
            }
            Ok(result)
        }
        JobOutcome::Failed(error) => {
            tracing::debug!(%job_id, code = %error.code, "Job failed");
            Err(error.into())
        }
        JobOutcome::Cancelled => Err(TransportableError::cancelled().into()),
    }
}
