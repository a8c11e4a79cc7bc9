//! Request and outcome audit records.
//!
//! Every operation writes one `requests` row through [`AuditLogger::log_request`]
//! and later exactly one kind-specific outcome row. The [`RequestReceipt`]
//! returned by the first call is consumed by the second, so a request cannot
//! be given two outcomes.
//!
//! Under zero data retention, identifying fields are replaced by
//! [`REDACTED`] or dropped before anything reaches the sink, and no content
//! is written to the content store.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::JobKind;
use crate::models::{
    BatchScrapeRecord, ChangeTrackingEntry, CrawlRecord, DeepResearchRecord, ExtractRecord,
    LlmsTxtRecord, MapRecord, ModelKind, OutcomeRecord, RequestRecord, ScrapeRecord, SearchRecord,
};
use crate::options::{Format, ScrapeOptions};
use crate::traits::{AuditSink, ContentStore};

/// Team that all preview traffic is attributed to.
pub const PREVIEW_TEAM_ID: &str = "3adefd26-77ec-5968-8dcf-c94b5630d1de";

/// Stand-in for redacted text fields.
pub const REDACTED: &str = "<redacted due to zero data retention>";

/// How long a privacy-mode request may be kept before the retention sweep.
pub fn retention_window() -> Duration {
    Duration::hours(24)
}

/// Preview team ids (`preview`, `preview_*`) map to [`PREVIEW_TEAM_ID`].
pub fn normalize_team_id(team_id: &str) -> String {
    if team_id == "preview" || team_id.starts_with("preview_") {
        PREVIEW_TEAM_ID.to_string()
    } else {
        team_id.to_string()
    }
}

fn redact(value: String, zero_data_retention: bool) -> String {
    if zero_data_retention {
        REDACTED.to_string()
    } else {
        value
    }
}

fn retain<T>(value: Option<T>, zero_data_retention: bool) -> Option<T> {
    if zero_data_retention { None } else { value }
}

#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// Record successful scrapes in the change-tracking history.
    pub change_tracking: bool,
}

/// An inbound operation, as described by the caller.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub id: Uuid,
    pub kind: JobKind,
    pub api_version: String,
    pub team_id: String,
    pub origin: String,
    pub integration: Option<String>,
    /// URL or query that identifies the target. Redacted under privacy mode.
    pub target_hint: String,
    pub zero_data_retention: bool,
    pub api_key_id: Option<i64>,
}

impl LoggedRequest {
    pub fn new(kind: JobKind, team_id: impl Into<String>, target_hint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            api_version: "v2".to_string(),
            team_id: team_id.into(),
            origin: "api".to_string(),
            integration: None,
            target_hint: target_hint.into(),
            zero_data_retention: false,
            api_key_id: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_integration(mut self, integration: Option<String>) -> Self {
        self.integration = integration;
        self
    }

    pub fn with_zero_data_retention(mut self, zdr: bool) -> Self {
        self.zero_data_retention = zdr;
        self
    }
}

/// Proof that a request row was written. Consumed by the outcome call.
#[derive(Debug)]
#[must_use = "a request must be given an outcome"]
pub struct RequestReceipt {
    request_id: Uuid,
    kind: JobKind,
    team_id: String,
    zero_data_retention: bool,
    created_at: DateTime<Utc>,
}

impl RequestReceipt {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn zero_data_retention(&self) -> bool {
        self.zero_data_retention
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy held back while an outcome write is in flight, so the outcome
    /// can be retried if the write fails. Only the crate may hold two.
    pub(crate) fn reissue(&self) -> Self {
        Self {
            request_id: self.request_id,
            kind: self.kind,
            team_id: self.team_id.clone(),
            zero_data_retention: self.zero_data_retention,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeLog {
    pub id: Uuid,
    pub url: String,
    pub is_successful: bool,
    pub error: Option<String>,
    /// The scraped document, written to the content store.
    pub document: Option<serde_json::Value>,
    /// Seconds.
    pub time_taken: f64,
    pub options: ScrapeOptions,
    pub cost_tracking: Option<serde_json::Value>,
    pub pdf_num_pages: Option<i32>,
    pub credits_cost: i64,
}

#[derive(Debug, Clone)]
pub struct CrawlLog {
    pub id: Uuid,
    pub url: String,
    pub options: Option<serde_json::Value>,
    pub num_docs: i32,
    pub credits_cost: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct BatchScrapeLog {
    pub id: Uuid,
    pub num_docs: i32,
    pub credits_cost: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct SearchLog {
    pub id: Uuid,
    pub query: String,
    pub options: Option<serde_json::Value>,
    pub time_taken: f64,
    pub credits_cost: i64,
    pub is_successful: bool,
    pub error: Option<String>,
    pub num_results: i32,
    pub results: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ExtractLog {
    pub id: Uuid,
    pub urls: Vec<String>,
    pub options: Option<serde_json::Value>,
    pub model_kind: ModelKind,
    pub credits_cost: i64,
    pub is_successful: bool,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub cost_tracking: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MapLog {
    pub id: Uuid,
    pub url: String,
    pub options: Option<serde_json::Value>,
    pub links: Vec<String>,
    pub credits_cost: i64,
}

#[derive(Debug, Clone)]
pub struct LlmsTxtLog {
    pub id: Uuid,
    pub url: String,
    pub options: Option<serde_json::Value>,
    pub num_urls: i32,
    pub cost_tracking: Option<serde_json::Value>,
    pub credits_cost: i64,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct DeepResearchLog {
    pub id: Uuid,
    pub query: String,
    pub options: Option<serde_json::Value>,
    pub time_taken: f64,
    pub credits_cost: i64,
    pub cost_tracking: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
}

/// Writes audit records to an [`AuditSink`] and full payloads to a
/// [`ContentStore`]. Both collaborators are optional.
#[derive(Clone)]
pub struct AuditLogger<S: AuditSink, C: ContentStore> {
    sink: Option<S>,
    content: Option<C>,
    config: AuditConfig,
}

impl<S: AuditSink, C: ContentStore> AuditLogger<S, C> {
    pub fn new(sink: Option<S>, content: Option<C>, config: AuditConfig) -> Self {
        Self {
            sink,
            content,
            config,
        }
    }

    fn sink(&self) -> Result<&S, AppError> {
        self.sink
            .as_ref()
            .ok_or(AppError::NotConfigured("persistence sink"))
    }

    pub async fn log_request(&self, request: LoggedRequest) -> Result<RequestReceipt, AppError> {
        let sink = self.sink()?;
        let zdr = request.zero_data_retention;
        let created_at = Utc::now();
        let record = RequestRecord {
            id: request.id,
            kind: request.kind,
            api_version: request.api_version,
            team_id: normalize_team_id(&request.team_id),
            origin: request.origin,
            integration: request.integration,
            target_hint: redact(request.target_hint, zdr),
            created_at,
            dr_clean_by: zdr.then(|| created_at + retention_window()),
            api_key_id: request.api_key_id,
        };
        sink.insert_request(&record).await?;
        tracing::info!(
            request_id = %record.id,
            kind = %record.kind,
            team_id = %record.team_id,
            zero_data_retention = zdr,
            "Request logged"
        );

        Ok(RequestReceipt {
            request_id: record.id,
            kind: record.kind,
            team_id: request.team_id,
            zero_data_retention: zdr,
            created_at,
        })
    }

    pub async fn log_scrape(&self, receipt: RequestReceipt, scrape: ScrapeLog) -> Result<(), AppError> {
        accept(&receipt, JobKind::Scrape)?;
        let zdr = receipt.zero_data_retention;
        let tracking = self.change_tracking_entry(&receipt, &scrape);

        let options = if zdr {
            None
        } else {
            Some(serde_json::to_value(&scrape.options)?)
        };
        let record = OutcomeRecord::Scrape(ScrapeRecord {
            id: scrape.id,
            request_id: receipt.request_id,
            url: redact(scrape.url, zdr),
            is_successful: scrape.is_successful,
            error: retain(scrape.error, zdr),
            time_taken: scrape.time_taken,
            team_id: normalize_team_id(&receipt.team_id),
            options,
            cost_tracking: retain(scrape.cost_tracking, zdr),
            pdf_num_pages: retain(scrape.pdf_num_pages, zdr),
            credits_cost: scrape.credits_cost,
        });
        self.write(&receipt, record, scrape.document).await?;

        if let Some(entry) = tracking {
            match self.sink()?.track_change(&entry).await {
                Ok(()) => tracing::debug!(scrape_id = %entry.scrape_id, "Change tracking recorded"),
                Err(e) => tracing::warn!(
                    scrape_id = %entry.scrape_id,
                    team_id = %entry.team_id,
                    error = %e,
                    "Failed to record change tracking"
                ),
            }
        }
        Ok(())
    }

    pub async fn log_crawl(&self, receipt: RequestReceipt, crawl: CrawlLog) -> Result<(), AppError> {
        accept(&receipt, JobKind::Crawl)?;
        let zdr = receipt.zero_data_retention;
        let record = OutcomeRecord::Crawl(CrawlRecord {
            id: crawl.id,
            request_id: receipt.request_id,
            url: redact(crawl.url, zdr),
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(crawl.options, zdr),
            num_docs: crawl.num_docs,
            credits_cost: crawl.credits_cost,
            cancelled: crawl.cancelled,
        });
        self.write(&receipt, record, None).await
    }

    pub async fn log_batch_scrape(
        &self,
        receipt: RequestReceipt,
        batch: BatchScrapeLog,
    ) -> Result<(), AppError> {
        accept(&receipt, JobKind::BatchScrape)?;
        let record = OutcomeRecord::BatchScrape(BatchScrapeRecord {
            id: batch.id,
            request_id: receipt.request_id,
            team_id: normalize_team_id(&receipt.team_id),
            num_docs: batch.num_docs,
            credits_cost: batch.credits_cost,
            cancelled: batch.cancelled,
        });
        self.write(&receipt, record, None).await
    }

    pub async fn log_search(&self, receipt: RequestReceipt, search: SearchLog) -> Result<(), AppError> {
        accept(&receipt, JobKind::Search)?;
        let zdr = receipt.zero_data_retention;
        let record = OutcomeRecord::Search(SearchRecord {
            id: search.id,
            request_id: receipt.request_id,
            query: redact(search.query, zdr),
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(search.options, zdr),
            time_taken: search.time_taken,
            credits_cost: search.credits_cost,
            is_successful: search.is_successful,
            error: retain(search.error, zdr),
            num_results: search.num_results,
        });
        self.write(&receipt, record, search.results).await
    }

    pub async fn log_extract(
        &self,
        receipt: RequestReceipt,
        extract: ExtractLog,
    ) -> Result<(), AppError> {
        accept(&receipt, JobKind::Extract)?;
        let zdr = receipt.zero_data_retention;
        let urls = if zdr {
            vec![REDACTED.to_string()]
        } else {
            extract.urls
        };
        let record = OutcomeRecord::Extract(ExtractRecord {
            id: extract.id,
            request_id: receipt.request_id,
            urls,
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(extract.options, zdr),
            model_kind: extract.model_kind,
            credits_cost: extract.credits_cost,
            is_successful: extract.is_successful,
            error: retain(extract.error, zdr),
            cost_tracking: retain(extract.cost_tracking, zdr),
        });
        self.write(&receipt, record, extract.result).await
    }

    pub async fn log_map(&self, receipt: RequestReceipt, map: MapLog) -> Result<(), AppError> {
        accept(&receipt, JobKind::Map)?;
        let zdr = receipt.zero_data_retention;
        let content = (!map.links.is_empty()).then(|| serde_json::json!(map.links));
        let record = OutcomeRecord::Map(MapRecord {
            id: map.id,
            request_id: receipt.request_id,
            url: redact(map.url, zdr),
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(map.options, zdr),
            num_results: map.links.len() as i32,
            credits_cost: map.credits_cost,
        });
        self.write(&receipt, record, content).await
    }

    pub async fn log_llmstxt(
        &self,
        receipt: RequestReceipt,
        llmstxt: LlmsTxtLog,
    ) -> Result<(), AppError> {
        accept(&receipt, JobKind::Llmstxt)?;
        let zdr = receipt.zero_data_retention;
        let record = OutcomeRecord::Llmstxt(LlmsTxtRecord {
            id: llmstxt.id,
            request_id: receipt.request_id,
            url: redact(llmstxt.url, zdr),
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(llmstxt.options, zdr),
            num_urls: llmstxt.num_urls,
            cost_tracking: retain(llmstxt.cost_tracking, zdr),
            credits_cost: llmstxt.credits_cost,
        });
        self.write(&receipt, record, llmstxt.result).await
    }

    pub async fn log_deep_research(
        &self,
        receipt: RequestReceipt,
        research: DeepResearchLog,
    ) -> Result<(), AppError> {
        accept(&receipt, JobKind::DeepResearch)?;
        let zdr = receipt.zero_data_retention;
        let record = OutcomeRecord::DeepResearch(DeepResearchRecord {
            id: research.id,
            request_id: receipt.request_id,
            query: redact(research.query, zdr),
            team_id: normalize_team_id(&receipt.team_id),
            options: retain(research.options, zdr),
            time_taken: research.time_taken,
            credits_cost: research.credits_cost,
            cost_tracking: retain(research.cost_tracking, zdr),
        });
        self.write(&receipt, record, research.result).await
    }

    /// Insert the outcome row, then save the payload if allowed.
    async fn write(
        &self,
        receipt: &RequestReceipt,
        record: OutcomeRecord,
        content: Option<serde_json::Value>,
    ) -> Result<(), AppError> {
        self.sink()?.insert_outcome(&record).await?;
        tracing::info!(
            id = %record.id(),
            request_id = %receipt.request_id,
            kind = %record.kind(),
            credits = record.credits_cost(),
            zero_data_retention = receipt.zero_data_retention,
            "Outcome logged"
        );

        if receipt.zero_data_retention {
            return Ok(());
        }
        if let (Some(content), Some(store)) = (content, &self.content) {
            // The row is already written; a failed save only loses the payload.
            if let Err(e) = store.save(record.kind(), record.id(), &content).await {
                tracing::warn!(id = %record.id(), kind = %record.kind(), error = %e, "Failed to save content");
            }
        }
        Ok(())
    }

    fn change_tracking_entry(
        &self,
        receipt: &RequestReceipt,
        scrape: &ScrapeLog,
    ) -> Option<ChangeTrackingEntry> {
        if !self.config.change_tracking || !scrape.is_successful || receipt.zero_data_retention {
            return None;
        }
        let markdown = scrape.options.format("markdown");
        let tracking = scrape.options.format("changeTracking");
        if markdown.is_none() && tracking.is_none() {
            return None;
        }
        Some(ChangeTrackingEntry {
            team_id: receipt.team_id.clone(),
            url: scrape.url.clone(),
            scrape_id: scrape.id,
            tag: tracking.and_then(Format::tag).map(str::to_string),
            recorded_at: Utc::now(),
        })
    }
}

fn accept(receipt: &RequestReceipt, kind: JobKind) -> Result<(), AppError> {
    if receipt.kind == kind {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Request {} is a {} request, not {}",
            receipt.request_id, receipt.kind, kind
        )))
    }
}
