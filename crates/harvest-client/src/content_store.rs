use harvest_core::error::AppError;
use harvest_core::job::JobKind;
use harvest_core::traits::ContentStore;
use reqwest::Client;
use url::Url;
use uuid::Uuid;

use crate::config::ContentStoreConfig;

/// Content store backed by an HTTP object endpoint.
///
/// Each payload is `PUT` as JSON to `{base_url}/{kind}/{id}.json`, which
/// matches the object layout of S3/GCS-style bucket gateways.
#[derive(Clone)]
pub struct HttpContentStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpContentStore {
    pub fn new(config: &ContentStoreConfig) -> Result<Self, AppError> {
        let parsed = Url::parse(&config.base_url).map_err(|e| {
            AppError::ConfigError(format!(
                "Invalid HARVEST_CONTENT_STORE_URL '{}': {e}",
                config.base_url
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "Content store scheme '{}' is not supported (only http/https)",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent("Harvest/0.1 (content store)")
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn object_url(&self, kind: JobKind, id: Uuid) -> String {
        format!("{}/{}/{}.json", self.base_url, kind, id)
    }
}

impl ContentStore for HttpContentStore {
    async fn save(
        &self,
        kind: JobKind,
        id: Uuid,
        content: &serde_json::Value,
    ) -> Result<(), AppError> {
        let url = self.object_url(kind, id);
        let mut request = self.client.put(&url).json(content);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ContentStoreError(format!("Upload of {kind}/{id} timed out"))
            } else {
                AppError::ContentStoreError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ContentStoreError(format!(
                "HTTP {} for {url}: {body}",
                status.as_u16()
            )));
        }

        tracing::debug!(%kind, %id, "Content saved");
        Ok(())
    }
}
