//! Typed view over the scrape options carried in a job payload.
//!
//! Only the fields the orchestration layer reads are modelled; everything
//! else is preserved in `extra` so the payload round-trips to workers intact.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::billing::{ProxyMode, ScrapeTier};

/// Requested output format: either a bare name or an object with a `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Format {
    Name(String),
    Object {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
}

impl Format {
    pub fn kind(&self) -> &str {
        match self {
            Format::Name(name) => name,
            Format::Object { kind, .. } => kind,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Format::Name(_) => None,
            Format::Object { tag, .. } => tag.as_deref(),
        }
    }
}

/// An in-page action. Only `wait` actions matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milliseconds: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub formats: Vec<Format>,
    /// Declared timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Fixed pause before capture, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<u64>,
    pub actions: Vec<Action>,
    pub proxy: ProxyMode,
    pub parsers: Vec<serde_json::Value>,
    pub zero_data_retention: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScrapeOptions {
    /// Lenient parse: an unreadable payload behaves like default options.
    pub fn from_payload(payload: &serde_json::Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }

    /// Time the worker legitimately spends waiting inside the job.
    ///
    /// `waitFor` plus every `wait` action's `milliseconds`.
    pub fn in_job_wait(&self) -> Duration {
        let actions: u64 = self
            .actions
            .iter()
            .filter(|a| a.kind == "wait")
            .filter_map(|a| a.milliseconds)
            .sum();
        Duration::from_millis(self.wait_for.unwrap_or(0).saturating_add(actions))
    }

    pub fn format(&self, kind: &str) -> Option<&Format> {
        self.formats.iter().find(|f| f.kind() == kind)
    }

    pub fn tier(&self) -> ScrapeTier {
        ScrapeTier {
            proxy: self.proxy,
            parsers: !self.parsers.is_empty(),
        }
    }
}
