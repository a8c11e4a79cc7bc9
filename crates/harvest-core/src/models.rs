use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::job::JobKind;

/// Row of the `requests` table: one per inbound operation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub kind: JobKind,
    pub api_version: String,
    pub team_id: String,
    pub origin: String,
    pub integration: Option<String>,
    pub target_hint: String,
    pub created_at: DateTime<Utc>,
    /// When the retention sweep must purge this request (privacy mode only).
    pub dr_clean_by: Option<DateTime<Utc>>,
    pub api_key_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScrapeRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub url: String,
    pub is_successful: bool,
    pub error: Option<String>,
    /// Seconds.
    pub time_taken: f64,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub cost_tracking: Option<serde_json::Value>,
    pub pdf_num_pages: Option<i32>,
    pub credits_cost: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CrawlRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub url: String,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub num_docs: i32,
    pub credits_cost: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BatchScrapeRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub team_id: String,
    pub num_docs: i32,
    pub credits_cost: i64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub query: String,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub time_taken: f64,
    pub credits_cost: i64,
    pub is_successful: bool,
    pub error: Option<String>,
    pub num_results: i32,
}

/// Extraction model generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelKind {
    #[serde(rename = "fire-0")]
    Fire0,
    #[serde(rename = "fire-1")]
    Fire1,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Fire0 => "fire-0",
            ModelKind::Fire1 => "fire-1",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fire-0" => Ok(ModelKind::Fire0),
            "fire-1" => Ok(ModelKind::Fire1),
            _ => Err(format!("Unknown model kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExtractRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub urls: Vec<String>,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub model_kind: ModelKind,
    pub credits_cost: i64,
    pub is_successful: bool,
    pub error: Option<String>,
    pub cost_tracking: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MapRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub url: String,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub num_results: i32,
    pub credits_cost: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LlmsTxtRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub url: String,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub num_urls: i32,
    pub cost_tracking: Option<serde_json::Value>,
    pub credits_cost: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeepResearchRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub query: String,
    pub team_id: String,
    pub options: Option<serde_json::Value>,
    pub time_taken: f64,
    pub credits_cost: i64,
    pub cost_tracking: Option<serde_json::Value>,
}

/// Kind-specific outcome row. Exactly one is written per request.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeRecord {
    Scrape(ScrapeRecord),
    Crawl(CrawlRecord),
    BatchScrape(BatchScrapeRecord),
    Search(SearchRecord),
    Extract(ExtractRecord),
    Map(MapRecord),
    Llmstxt(LlmsTxtRecord),
    DeepResearch(DeepResearchRecord),
}

impl OutcomeRecord {
    pub fn kind(&self) -> JobKind {
        match self {
            OutcomeRecord::Scrape(_) => JobKind::Scrape,
            OutcomeRecord::Crawl(_) => JobKind::Crawl,
            OutcomeRecord::BatchScrape(_) => JobKind::BatchScrape,
            OutcomeRecord::Search(_) => JobKind::Search,
            OutcomeRecord::Extract(_) => JobKind::Extract,
            OutcomeRecord::Map(_) => JobKind::Map,
            OutcomeRecord::Llmstxt(_) => JobKind::Llmstxt,
            OutcomeRecord::DeepResearch(_) => JobKind::DeepResearch,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            OutcomeRecord::Scrape(r) => r.id,
            OutcomeRecord::Crawl(r) => r.id,
            OutcomeRecord::BatchScrape(r) => r.id,
            OutcomeRecord::Search(r) => r.id,
            OutcomeRecord::Extract(r) => r.id,
            OutcomeRecord::Map(r) => r.id,
            OutcomeRecord::Llmstxt(r) => r.id,
            OutcomeRecord::DeepResearch(r) => r.id,
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            OutcomeRecord::Scrape(r) => r.request_id,
            OutcomeRecord::Crawl(r) => r.request_id,
            OutcomeRecord::BatchScrape(r) => r.request_id,
            OutcomeRecord::Search(r) => r.request_id,
            OutcomeRecord::Extract(r) => r.request_id,
            OutcomeRecord::Map(r) => r.request_id,
            OutcomeRecord::Llmstxt(r) => r.request_id,
            OutcomeRecord::DeepResearch(r) => r.request_id,
        }
    }

    pub fn credits_cost(&self) -> i64 {
        match self {
            OutcomeRecord::Scrape(r) => r.credits_cost,
            OutcomeRecord::Crawl(r) => r.credits_cost,
            OutcomeRecord::BatchScrape(r) => r.credits_cost,
            OutcomeRecord::Search(r) => r.credits_cost,
            OutcomeRecord::Extract(r) => r.credits_cost,
            OutcomeRecord::Map(r) => r.credits_cost,
            OutcomeRecord::Llmstxt(r) => r.credits_cost,
            OutcomeRecord::DeepResearch(r) => r.credits_cost,
        }
    }
}

/// Entry for the change-tracking side channel.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChangeTrackingEntry {
    pub team_id: String,
    pub url: String,
    pub scrape_id: Uuid,
    /// Tag of the `changeTracking` format, if one was given.
    pub tag: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
