//! Inbound request flows.
//!
//! Ties the queue, lifecycle, coordinators, billing and audit logger
//! together: a sync scrape is submitted, awaited, billed, logged and
//! removed; a batch is submitted and returns at once, and is billed and
//! logged exactly once when it is first observed complete, either by a
//! status poll or by [`Orchestrator::reconcile`].

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::audit::{AuditLogger, BatchScrapeLog, LoggedRequest, RequestReceipt, ScrapeLog};
use crate::billing::{BillableOperation, credits_for};
use crate::cancel::{CancelOutcome, CancellationCoordinator};
use crate::config::CoreConfig;
use crate::error::AppError;
use crate::job::{Batch, Job, JobKind, JobState, NewBatch, NewJob, SubmitMode};
use crate::job_queue::JobQueue;
use crate::lifecycle::JobLifecycle;
use crate::options::ScrapeOptions;
use crate::priority::{BASE_PRIORITY, BULK_BASE_PRIORITY, TeamTier, job_priority};
use crate::traits::{AuditSink, ContentStore};
use crate::wait::WaitCoordinator;

/// A synchronous scrape request.
#[derive(Debug, Clone)]
pub struct ScrapeCall {
    pub team_id: String,
    pub team_tier: TeamTier,
    /// Scrape options as sent by the client; stored as the job payload.
    pub payload: serde_json::Value,
    pub preview_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutput {
    pub job_id: Uuid,
    pub document: serde_json::Value,
    pub credits: u64,
}

/// An asynchronous batch scrape request.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub team_id: String,
    pub team_tier: TeamTier,
    pub urls: Vec<String>,
    /// Options shared by every URL of the batch.
    pub options: serde_json::Value,
    pub preview_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Scraping,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Scraping => "scraping",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of a batch's children.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub id: Uuid,
    pub status: BatchStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Billed so far: one unit per completed child.
    pub credits_used: u64,
    /// Results of completed children, in submission order.
    pub data: Vec<serde_json::Value>,
}

impl BatchProgress {
    fn is_done(&self) -> bool {
        self.status != BatchStatus::Scraping
    }
}

pub struct Orchestrator<Q: JobQueue, S: AuditSink, C: ContentStore> {
    lifecycle: JobLifecycle<Q>,
    waiter: WaitCoordinator<Q>,
    canceller: CancellationCoordinator<Q>,
    audit: AuditLogger<S, C>,
    config: CoreConfig,
    /// Batches accepted by this process and still waiting for their single
    /// outcome record.
    pending: DashMap<Uuid, RequestReceipt>,
}

impl<Q: JobQueue, S: AuditSink, C: ContentStore> Orchestrator<Q, S, C> {
    pub fn new(queue: Q, audit: AuditLogger<S, C>, config: CoreConfig) -> Self {
        let lifecycle = JobLifecycle::new(queue);
        Self {
            waiter: WaitCoordinator::new(lifecycle.clone(), config.wait.clone()),
            canceller: CancellationCoordinator::new(lifecycle.clone()),
            lifecycle,
            audit,
            config,
            pending: DashMap::new(),
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycle<Q> {
        &self.lifecycle
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    fn submit_mode(&self, preview_token: Option<&str>) -> SubmitMode {
        match (self.config.preview_token.as_deref(), preview_token) {
            (Some(expected), Some(given)) if expected == given => SubmitMode::Direct,
            _ => SubmitMode::Admitted,
        }
    }

    async fn priority(
        &self,
        base: i32,
        team_id: &str,
        tier: TeamTier,
        mode: SubmitMode,
    ) -> Result<i32, AppError> {
        match mode {
            SubmitMode::Direct => Ok(base),
            SubmitMode::Admitted => {
                let load = self.lifecycle.queue().admitted_load(team_id).await?;
                Ok(job_priority(base, tier, load))
            }
        }
    }

    /// Scrape one URL and wait for the document.
    pub async fn scrape(&self, call: ScrapeCall) -> Result<ScrapeOutput, AppError> {
        let options: ScrapeOptions = serde_json::from_value(call.payload.clone())
            .map_err(|e| AppError::Validation(format!("Invalid scrape options: {e}")))?;
        let url = required_url(options.url.as_deref())?;
        let zdr = options.zero_data_retention;

        let receipt = self
            .audit
            .log_request(
                LoggedRequest::new(JobKind::Scrape, &call.team_id, url.clone())
                    .with_origin(options.origin.clone().unwrap_or_else(|| "api".into()))
                    .with_integration(options.integration.clone())
                    .with_zero_data_retention(zdr),
            )
            .await?;

        let mode = self.submit_mode(call.preview_token.as_deref());
        let submitted = match self
            .priority(BASE_PRIORITY, &call.team_id, call.team_tier, mode)
            .await
        {
            Ok(priority) => {
                self.lifecycle
                    .submit(
                        NewJob::new(JobKind::Scrape, &call.team_id, call.payload)
                            .with_id(receipt.request_id())
                            .with_zero_data_retention(zdr),
                        priority,
                        mode,
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        let job = match submitted {
            Ok(job) => job,
            Err(e) => {
                let log = failed_scrape(receipt.request_id(), url, options, &e, 0.0);
                if let Err(log_err) = self.audit.log_scrape(receipt, log).await {
                    tracing::error!(error = %log_err, "Failed to log rejected scrape");
                }
                return Err(e);
            }
        };

        let started = Instant::now();
        let timeout = options.timeout.map(Duration::from_millis);
        let outcome = self.waiter.wait_for_job(job.id, timeout, zdr).await;
        let time_taken = started.elapsed().as_secs_f64();

        match outcome {
            Ok(document) => {
                self.discard(job.id).await;
                let credits = credits_for(
                    &BillableOperation::Documents {
                        tier: options.tier(),
                        produced: 1,
                    },
                    zdr,
                    &self.config.pricing,
                );
                let log = ScrapeLog {
                    id: job.id,
                    url,
                    is_successful: true,
                    error: None,
                    pdf_num_pages: pdf_num_pages(&document),
                    document: Some(document.clone()),
                    time_taken,
                    options,
                    cost_tracking: None,
                    credits_cost: credits as i64,
                };
                self.audit.log_scrape(receipt, log).await?;
                Ok(ScrapeOutput {
                    job_id: job.id,
                    document,
                    credits,
                })
            }
            Err(e) => {
                // Timed out jobs were already removed by the wait coordinator.
                if zdr && !e.is_timeout() {
                    self.discard(job.id).await;
                }
                let log = failed_scrape(job.id, url, options, &e, time_taken);
                self.audit.log_scrape(receipt, log).await?;
                Err(e)
            }
        }
    }

    async fn discard(&self, job_id: Uuid) {
        if let Err(e) = self.lifecycle.remove(job_id).await {
            tracing::warn!(%job_id, error = %e, "Failed to remove finished job");
        }
    }

    /// Submit one scrape job per URL and return immediately.
    pub async fn batch_scrape(&self, call: BatchCall) -> Result<Batch, AppError> {
        if call.urls.is_empty() {
            return Err(AppError::Validation("urls must not be empty".into()));
        }
        let mut payloads = Vec::with_capacity(call.urls.len());
        for url in &call.urls {
            required_url(Some(url))?;
            let mut payload = match &call.options {
                serde_json::Value::Null => serde_json::Map::new(),
                serde_json::Value::Object(map) => map.clone(),
                _ => return Err(AppError::Validation("options must be an object".into())),
            };
            payload.insert("url".into(), serde_json::Value::String(url.clone()));
            payloads.push(serde_json::Value::Object(payload));
        }
        let options = ScrapeOptions::from_payload(&call.options);
        let zdr = options.zero_data_retention;

        let receipt = self
            .audit
            .log_request(
                LoggedRequest::new(JobKind::BatchScrape, &call.team_id, call.urls[0].clone())
                    .with_origin(options.origin.clone().unwrap_or_else(|| "api".into()))
                    .with_integration(options.integration.clone())
                    .with_zero_data_retention(zdr),
            )
            .await?;

        let mode = self.submit_mode(call.preview_token.as_deref());
        let submitted = match self
            .priority(BULK_BASE_PRIORITY, &call.team_id, call.team_tier, mode)
            .await
        {
            Ok(priority) => {
                let request = NewBatch::new(JobKind::BatchScrape, &call.team_id, payloads)
                    .with_zero_data_retention(zdr);
                self.lifecycle.submit_batch(request, priority, mode).await
            }
            Err(e) => Err(e),
        };
        let batch = match submitted {
            Ok((batch, _)) => batch,
            Err(e) => {
                // Nothing was left queued, so nothing is billed.
                let log = BatchScrapeLog {
                    id: receipt.request_id(),
                    num_docs: 0,
                    credits_cost: 0,
                    cancelled: true,
                };
                if let Err(log_err) = self.audit.log_batch_scrape(receipt, log).await {
                    tracing::error!(error = %log_err, "Failed to log rejected batch");
                }
                return Err(e);
            }
        };

        self.pending.insert(batch.id, receipt);
        Ok(batch)
    }

    async fn owned_batch(&self, batch_id: Uuid, team_id: &str) -> Result<Batch, AppError> {
        match self.lifecycle.queue().get_batch(batch_id).await? {
            Some(batch) if batch.team_id == team_id => Ok(batch),
            _ => Err(AppError::NotFound(format!("Batch not found: {batch_id}"))),
        }
    }

    /// Progress of a batch. Finalizes it the first time it is seen complete.
    pub async fn batch_status(
        &self,
        batch_id: Uuid,
        team_id: &str,
    ) -> Result<BatchProgress, AppError> {
        let batch = self.owned_batch(batch_id, team_id).await?;
        let progress = self.progress(&batch).await?;
        if progress.is_done() {
            self.finalize(&batch, &progress).await?;
        }
        Ok(progress)
    }

    /// Cancel every unfinished job of a batch.
    pub async fn cancel_batch(
        &self,
        batch_id: Uuid,
        team_id: &str,
    ) -> Result<CancelOutcome, AppError> {
        self.owned_batch(batch_id, team_id).await?;
        let outcome = self.canceller.cancel_batch(batch_id).await?;
        if self.canceller.is_batch_complete(batch_id).await? {
            let batch = self.owned_batch(batch_id, team_id).await?;
            let progress = self.progress(&batch).await?;
            self.finalize(&batch, &progress).await?;
        }
        Ok(outcome)
    }

    /// Job as stored in the backend, scoped to the caller's team.
    pub async fn job_status(&self, job_id: Uuid, team_id: &str) -> Result<Job, AppError> {
        match self.lifecycle.get_job(job_id).await? {
            Some(job) if job.team_id == team_id => Ok(job),
            _ => Err(AppError::NotFound(format!("Job not found: {job_id}"))),
        }
    }

    /// Finalize every batch of this process that finished without being
    /// polled. Returns how many were finalized.
    pub async fn reconcile(&self) -> Result<usize, AppError> {
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut finalized = 0;
        for batch_id in ids {
            let Some(batch) = self.lifecycle.queue().get_batch(batch_id).await? else {
                tracing::warn!(%batch_id, "Pending batch vanished from the backend");
                continue;
            };
            let progress = self.progress(&batch).await?;
            // A failed write was logged and stays pending for the next pass.
            if progress.is_done() && matches!(self.finalize(&batch, &progress).await, Ok(true)) {
                finalized += 1;
            }
        }
        if finalized > 0 {
            tracing::debug!(finalized, "Reconciled finished batches");
        }
        Ok(finalized)
    }

    async fn progress(&self, batch: &Batch) -> Result<BatchProgress, AppError> {
        let mut progress = BatchProgress {
            id: batch.id,
            status: BatchStatus::Scraping,
            total: batch.job_ids.len(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            credits_used: 0,
            data: Vec::new(),
        };
        let mut live = 0;
        for job_id in &batch.job_ids {
            let Some(job) = self.lifecycle.get_job(*job_id).await? else {
                self.lifecycle.forget(*job_id);
                continue;
            };
            if job.state.is_terminal() {
                self.lifecycle.forget(job.id);
            }
            match job.state {
                JobState::Queued | JobState::Active => live += 1,
                JobState::Completed => {
                    progress.completed += 1;
                    progress.credits_used += credits_for(
                        &BillableOperation::Documents {
                            tier: ScrapeOptions::from_payload(&job.payload).tier(),
                            produced: 1,
                        },
                        batch.zero_data_retention,
                        &self.config.pricing,
                    );
                    if let Some(result) = job.result {
                        progress.data.push(result);
                    }
                }
                JobState::Failed => progress.failed += 1,
                JobState::Cancelled => progress.cancelled += 1,
            }
        }

        progress.status = match (live, batch.cancelled) {
            (0, true) => BatchStatus::Cancelled,
            (0, false) => BatchStatus::Completed,
            _ => BatchStatus::Scraping,
        };
        Ok(progress)
    }

    /// Write the batch's outcome record. Returns whether this call wrote it.
    async fn finalize(&self, batch: &Batch, progress: &BatchProgress) -> Result<bool, AppError> {
        // Taking the entry out is what makes this run once per batch; a
        // concurrent caller finds it gone and returns.
        let Some((_, receipt)) = self.pending.remove(&batch.id) else {
            return Ok(false);
        };
        let retry = receipt.reissue();
        let log = BatchScrapeLog {
            id: batch.id,
            num_docs: progress.completed as i32,
            credits_cost: progress.credits_used as i64,
            cancelled: batch.cancelled,
        };
        if let Err(e) = self.audit.log_batch_scrape(receipt, log).await {
            // No row was written; the next poll or reconcile pass retries.
            self.pending.insert(batch.id, retry);
            tracing::warn!(batch_id = %batch.id, error = %e, "Failed to finalize batch");
            return Err(e);
        }
        tracing::info!(
            batch_id = %batch.id,
            completed = progress.completed,
            failed = progress.failed,
            cancelled = progress.cancelled,
            credits = progress.credits_used,
            "Batch finished"
        );

        if batch.zero_data_retention {
            // Results were handed out with this progress; do not keep them.
            for job_id in &batch.job_ids {
                if let Err(e) = self.lifecycle.remove(*job_id).await {
                    tracing::warn!(%job_id, batch_id = %batch.id, error = %e, "Failed to remove batch job");
                }
            }
        }
        Ok(true)
    }
}

fn failed_scrape(
    id: Uuid,
    url: String,
    options: ScrapeOptions,
    error: &AppError,
    time_taken: f64,
) -> ScrapeLog {
    ScrapeLog {
        id,
        url,
        is_successful: false,
        error: Some(error.to_string()),
        document: None,
        time_taken,
        options,
        cost_tracking: None,
        pdf_num_pages: None,
        credits_cost: 0,
    }
}

fn required_url(url: Option<&str>) -> Result<String, AppError> {
    match url.map(str::trim) {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Ok(url.to_string())
        }
        Some("") | None => Err(AppError::Validation("url is required".into())),
        Some(other) => Err(AppError::Validation(format!(
            "url must be http(s): {other}"
        ))),
    }
}

fn pdf_num_pages(document: &serde_json::Value) -> Option<i32> {
    document
        .pointer("/metadata/numPages")
        .and_then(serde_json::Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}
