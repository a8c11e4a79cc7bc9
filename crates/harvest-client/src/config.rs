use std::time::Duration;

use harvest_core::AppError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where full result payloads are uploaded.
#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    /// Objects are written to `{base_url}/{kind}/{id}.json`.
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ContentStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read configuration from environment variables.
    ///
    /// - `HARVEST_CONTENT_STORE_URL` (optional; `None` disables the store)
    /// - `HARVEST_CONTENT_STORE_TOKEN` (optional bearer token)
    pub fn from_env() -> Result<Option<Self>, AppError> {
        let Some(base_url) = std::env::var("HARVEST_CONTENT_STORE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
        else {
            return Ok(None);
        };

        let mut config = Self::new(base_url.trim());
        if let Some(token) = std::env::var("HARVEST_CONTENT_STORE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
        {
            config = config.with_token(token);
        }
        Ok(Some(config))
    }
}
