use std::time::Duration;

use crate::audit::AuditConfig;
use crate::billing::PricingTable;
use crate::error::AppError;
use crate::wait::WaitConfig;

/// Runtime settings for the orchestration core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub wait: WaitConfig,
    pub pricing: PricingTable,
    pub audit: AuditConfig,
    /// Requests presenting this token are submitted directly, without
    /// admission accounting. `None` disables the preview path.
    pub preview_token: Option<String>,
    /// How often unfinished batches are checked for completion in the
    /// background, so batches nobody polls are still billed.
    pub reconcile_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            pricing: PricingTable::default(),
            audit: AuditConfig::default(),
            preview_token: None,
            reconcile_interval: Duration::from_secs(5),
        }
    }
}

impl CoreConfig {
    /// Read configuration from environment variables.
    ///
    /// - `HARVEST_WAIT_POLL_MS` (optional, defaults to 50)
    /// - `HARVEST_WAIT_POLL_MAX_MS` (optional, defaults to 1000)
    /// - `HARVEST_MAX_WAIT_MS` (optional, uncapped when unset)
    /// - `HARVEST_CHANGE_TRACKING` (optional, `true`/`false`, defaults to false)
    /// - `HARVEST_PREVIEW_TOKEN` (optional)
    /// - `HARVEST_RECONCILE_INTERVAL_MS` (optional, defaults to 5000)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = WaitConfig::default();
        let poll_initial = optional_millis("HARVEST_WAIT_POLL_MS")?.unwrap_or(defaults.poll_initial);
        let poll_max = optional_millis("HARVEST_WAIT_POLL_MAX_MS")?.unwrap_or(defaults.poll_max);
        if poll_initial.is_zero() || poll_max < poll_initial {
            return Err(AppError::ConfigError(
                "HARVEST_WAIT_POLL_MAX_MS must be at least HARVEST_WAIT_POLL_MS, both above zero"
                    .into(),
            ));
        }

        let reconcile_interval = optional_millis("HARVEST_RECONCILE_INTERVAL_MS")?
            .unwrap_or(Duration::from_secs(5));
        if reconcile_interval.is_zero() {
            return Err(AppError::ConfigError(
                "HARVEST_RECONCILE_INTERVAL_MS must be above zero".into(),
            ));
        }

        let change_tracking = match std::env::var("HARVEST_CHANGE_TRACKING") {
            Err(_) => false,
            Ok(raw) => parse_bool("HARVEST_CHANGE_TRACKING", &raw)?,
        };

        Ok(Self {
            wait: WaitConfig {
                poll_initial,
                poll_max,
                max_wait: optional_millis("HARVEST_MAX_WAIT_MS")?,
            },
            pricing: PricingTable::default(),
            audit: AuditConfig { change_tracking },
            preview_token: std::env::var("HARVEST_PREVIEW_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            reconcile_interval,
        })
    }
}

fn optional_millis(name: &str) -> Result<Option<Duration>, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => parse_millis(name, &raw).map(Some),
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration, AppError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {name} '{raw}': must be a whole number of milliseconds"
            ))
        })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {name} '{raw}': expected true or false"
        ))),
    }
}
