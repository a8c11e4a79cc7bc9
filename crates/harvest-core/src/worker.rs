use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, TransportableError};
use crate::job::{Job, JobState, Transition, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::lifecycle::JobLifecycle;
use crate::traits::JobExecutor;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    JobClaimed {
        job: &'a Job,
    },
    JobCompleted {
        job_id: Uuid,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a TransportableError,
    },
    /// The job reached another terminal state (or was removed) while running;
    /// this worker's result was discarded.
    ResultDiscarded {
        job_id: Uuid,
        current: Option<JobState>,
    },
    Stopped {
        worker_id: &'a str,
        jobs_processed: u64,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(job_id = %job.id, kind = %job.kind, priority = job.priority, "Job claimed");
            }
            WorkerEvent::JobCompleted { job_id } => {
                tracing::info!(%job_id, "Job completed");
            }
            WorkerEvent::JobFailed { job_id, error } => {
                tracing::warn!(%job_id, code = %error.code, error = %error.message, "Job failed");
            }
            WorkerEvent::ResultDiscarded { job_id, current } => {
                tracing::info!(%job_id, ?current, "Job finished elsewhere, result discarded");
            }
            WorkerEvent::Stopped {
                worker_id,
                jobs_processed,
            } => {
                tracing::info!(%worker_id, %jobs_processed, "Worker stopped");
            }
        }
    }
}

/// Worker that claims jobs and runs them through a [`JobExecutor`].
pub struct WorkerService<Q: JobQueue, E: JobExecutor> {
    lifecycle: JobLifecycle<Q>,
    executor: E,
    config: WorkerConfig,
}

impl<Q: JobQueue, E: JobExecutor> WorkerService<Q, E> {
    pub fn new(lifecycle: JobLifecycle<Q>, executor: E, config: WorkerConfig) -> Self {
        Self {
            lifecycle,
            executor,
            config,
        }
    }

    /// Run the worker loop until cancellation.
    ///
    /// A job already claimed when the token fires is still finished.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        let mut processed = 0u64;
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.lifecycle.claim(&self.config.worker_id).await {
                Ok(Some(job)) => {
                    reporter.report(WorkerEvent::JobClaimed { job: &job });
                    self.process_job(&job, reporter).await;
                    processed += 1;
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
            jobs_processed: processed,
        });
        Ok(())
    }

    async fn process_job<WR: WorkerReporter>(&self, job: &Job, reporter: &WR) {
        let transition = match self.executor.execute(job).await {
            Ok(result) => self.lifecycle.complete(job.id, result).await,
            Err(e) => {
                let error = e.into_transportable();
                reporter.report(WorkerEvent::JobFailed {
                    job_id: job.id,
                    error: &error,
                });
                self.lifecycle.fail(job.id, error).await
            }
        };

        match transition {
            Ok(Transition::Applied(done)) => {
                if done.state == JobState::Completed {
                    reporter.report(WorkerEvent::JobCompleted { job_id: job.id });
                }
            }
            Ok(Transition::Rejected { current }) => {
                reporter.report(WorkerEvent::ResultDiscarded {
                    job_id: job.id,
                    current: Some(current),
                });
            }
            Err(AppError::NotFound(_)) => {
                reporter.report(WorkerEvent::ResultDiscarded {
                    job_id: job.id,
                    current: None,
                });
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
            }
        }
    }
}
