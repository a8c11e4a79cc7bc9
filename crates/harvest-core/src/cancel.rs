use uuid::Uuid;

use crate::error::AppError;
use crate::job::Transition;
use crate::job_queue::JobQueue;
use crate::lifecycle::JobLifecycle;

/// Result of a batch cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Every child was already terminal; nothing to cancel.
    AlreadyCompleted,
    /// The batch was live. `count` children actually moved to `cancelled`;
    /// the rest finished on their own first.
    Cancelled { count: usize },
}

/// Cancels the non-terminal jobs of a batch.
///
/// Each child is cancelled with its own compare-and-swap, so a worker that
/// completes a job concurrently either wins (the job keeps its result) or
/// loses (the completion is rejected). There is no batch-wide lock.
#[derive(Clone)]
pub struct CancellationCoordinator<Q: JobQueue> {
    lifecycle: JobLifecycle<Q>,
}

impl<Q: JobQueue> CancellationCoordinator<Q> {
    pub fn new(lifecycle: JobLifecycle<Q>) -> Self {
        Self { lifecycle }
    }

    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<CancelOutcome, AppError> {
        let queue = self.lifecycle.queue();
        let batch = queue
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch not found: {batch_id}")))?;

        let mut live = Vec::new();
        for job_id in &batch.job_ids {
            // A child that is gone from the backend counts as terminal.
            if let Some(state) = queue.peek_state(*job_id).await?
                && !state.is_terminal()
            {
                live.push(*job_id);
            }
        }

        if live.is_empty() {
            tracing::debug!(%batch_id, "Batch already completed, nothing to cancel");
            return Ok(CancelOutcome::AlreadyCompleted);
        }

        let mut count = 0;
        for job_id in live {
            match self.lifecycle.cancel(job_id).await {
                Ok(Transition::Applied(_)) => count += 1,
                Ok(Transition::Rejected { current }) => {
                    tracing::debug!(%batch_id, %job_id, %current, "Job finished before cancel");
                }
                // Removed between the peek and the cancel.
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if count > 0 {
            queue.mark_batch_cancelled(batch_id).await?;
        }
        tracing::info!(%batch_id, cancelled = count, "Batch cancelled");
        Ok(CancelOutcome::Cancelled { count })
    }

    /// Whether every child of the batch is terminal (or removed).
    pub async fn is_batch_complete(&self, batch_id: Uuid) -> Result<bool, AppError> {
        let queue = self.lifecycle.queue();
        let batch = queue
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch not found: {batch_id}")))?;
        for job_id in &batch.job_ids {
            if matches!(queue.peek_state(*job_id).await?, Some(s) if !s.is_terminal()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl CancelOutcome {
    pub fn cancelled_count(&self) -> usize {
        match self {
            CancelOutcome::AlreadyCompleted => 0,
            CancelOutcome::Cancelled { count } => *count,
        }
    }
}
