//! Control-plane client for managed storage.
//!
//! All calls are form-encoded POSTs answered with a `{code, message, data}`
//! envelope. A call only succeeds on HTTP 2xx with `code == 200` and a
//! present `data` payload.

pub mod token;

pub use token::{Token, TokenManager};

use crate::config::SpaceConfig;
use crate::utils::errors::{OrchestratorError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Envelope `code` for success.
pub const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Token expiry as sent by the control plane: epoch milliseconds (number or
/// numeric string) or an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawExpiration {
    Millis(i64),
    Text(String),
}

impl RawExpiration {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            RawExpiration::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            RawExpiration::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Utc.timestamp_millis_opt(ms).single();
                }
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

/// Raw credential payload. Validated into a [`Token`] before use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenData {
    #[serde(default)]
    pub cloud: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub st: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub sk: String,
    #[serde(default)]
    pub ak: String,
    #[serde(default)]
    pub expiration: Option<RawExpiration>,
    #[serde(default)]
    pub region: String,
}

/// A region offered by the managed storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub region_name: String,
}

pub struct SpaceClient {
    http: reqwest::Client,
    config: SpaceConfig,
}

impl SpaceClient {
    pub fn new(config: SpaceConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            return Err(OrchestratorError::Config("space.api_url is not set".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Request fresh credentials for `cloud_name` in `region`. One attempt.
    pub async fn acquire(&self, cloud_name: &str, region: &str) -> Result<TokenData> {
        let form = [
            ("cloudName", cloud_name.to_string()),
            ("durationSeconds", self.config.duration_secs.to_string()),
            ("region", region.to_string()),
            ("token", self.config.user_token.clone()),
            ("userid", self.config.user_id.clone()),
            ("clusterId", self.config.cluster_id.clone()),
        ];
        self.post(&self.config.acquire_path, &form).await
    }

    /// Exchange the previous credentials for new ones. One attempt.
    pub async fn refresh(&self, previous: &Token) -> Result<TokenData> {
        let form = [
            ("ak", previous.access_key.clone()),
            ("sk", previous.secret_key.clone()),
            ("st", previous.session_token.clone()),
            ("durationSeconds", self.config.duration_secs.to_string()),
        ];
        self.post(&self.config.refresh_path, &form).await
    }

    pub async fn regions(&self) -> Result<Vec<Region>> {
        let form = [
            ("token", self.config.user_token.clone()),
            ("userid", self.config.user_id.clone()),
        ];
        self.post(&self.config.regions_path, &form).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self.http.post(&url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Token(format!(
                "{} returned HTTP {}: {}",
                path,
                status,
                body.trim()
            )));
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.code != SUCCESS_CODE {
            return Err(OrchestratorError::Token(format!(
                "{} returned code {}: {}",
                path, envelope.code, envelope.message
            )));
        }
        envelope
            .data
            .ok_or_else(|| OrchestratorError::Token(format!("{} returned no data", path)))
    }
}
