//! Short-lived managed-storage credentials and their lifecycle.
//!
//! A [`TokenManager`] caches at most one token, keyed by repository name and
//! region. A cached token is usable only while every secret field is set and
//! its expiry is more than [`EXPIRY_MARGIN_MINUTES`] away, which leaves room
//! for a long engine run to finish before the credentials lapse. Acquisition
//! and refresh replace the token as a unit, never field by field.

use super::{SpaceClient, TokenData};
use crate::repository::{space, Credentials, ProviderKind, RepositoryTarget};
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::retry::{retry, BackoffPolicy};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const EXPIRY_MARGIN_MINUTES: i64 = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub cloud: String,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Validate a control-plane payload. Every field except `prefix` is
    /// required.
    pub fn from_data(data: TokenData) -> Result<Self> {
        let missing: Vec<&str> = [
            ("cloud", &data.cloud),
            ("region", &data.region),
            ("bucket", &data.bucket),
            ("ak", &data.ak),
            ("sk", &data.sk),
            ("st", &data.st),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::Token(format!(
                "response is missing {}",
                missing.join(", ")
            )));
        }

        let expires_at = data
            .expiration
            .as_ref()
            .and_then(|raw| raw.to_datetime())
            .ok_or_else(|| OrchestratorError::Token("response has no usable expiration".to_string()))?;

        Ok(Self {
            cloud: data.cloud,
            region: data.region,
            bucket: data.bucket,
            prefix: data.prefix,
            access_key: data.ak,
            secret_key: data.sk,
            session_token: data.st,
            expires_at,
        })
    }

    pub fn is_complete(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty() && !self.session_token.is_empty()
    }

    /// True when `now + margin` is past the expiry.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now + margin > self.expires_at
    }

    pub fn repository_url(&self, repo_name: &str) -> String {
        space::format_url(&self.cloud, &self.region, &self.bucket, &self.prefix, repo_name)
    }

    pub fn target(&self, repo_name: &str) -> RepositoryTarget {
        RepositoryTarget {
            kind: ProviderKind::Space,
            repo_name: repo_name.to_string(),
            url: self.repository_url(repo_name),
            region: self.region.clone(),
            cloud_name: self.cloud.clone(),
        }
    }

    pub fn credentials(&self, password: &str) -> Credentials {
        Credentials {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            session_token: Some(self.session_token.clone()),
            password: password.to_string(),
            expires_at: Some(self.expires_at),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("cloud", &self.cloud)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    repo_name: String,
    token: Token,
}

pub struct TokenManager {
    client: SpaceClient,
    policy: BackoffPolicy,
    cached: Option<CachedToken>,
}

impl TokenManager {
    pub fn new(client: SpaceClient, policy: BackoffPolicy) -> Self {
        Self {
            client,
            policy,
            cached: None,
        }
    }

    pub fn client(&self) -> &SpaceClient {
        &self.client
    }

    pub fn current(&self) -> Option<&Token> {
        self.cached.as_ref().map(|c| &c.token)
    }

    pub fn is_valid(&self, repo_name: &str, region: &str) -> bool {
        self.is_valid_at(repo_name, region, Utc::now())
    }

    pub fn is_valid_at(&self, repo_name: &str, region: &str, now: DateTime<Utc>) -> bool {
        match &self.cached {
            Some(cached) => {
                cached.repo_name == repo_name
                    && cached.token.region == region
                    && cached.token.is_complete()
                    && !cached
                        .token
                        .expires_within(Duration::minutes(EXPIRY_MARGIN_MINUTES), now)
            }
            None => false,
        }
    }

    /// Acquire new credentials for `repo_name`, replacing any cached token.
    pub async fn acquire(
        &mut self,
        repo_name: &str,
        cloud_name: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        let client = &self.client;
        let token = retry(&self.policy, "acquire space token", cancel, move || async move {
            Token::from_data(client.acquire(cloud_name, region).await?)
        })
        .await?;

        info!(
            "Acquired {} credentials for {} in {} (expires {})",
            token.cloud, repo_name, token.region, token.expires_at
        );
        self.store(repo_name, token.clone());
        Ok(token)
    }

    /// Exchange the cached token for a new one.
    pub async fn refresh(&mut self, cancel: &CancellationToken) -> Result<Token> {
        let cached = self
            .cached
            .clone()
            .ok_or_else(|| OrchestratorError::Token("no token to refresh".to_string()))?;

        let client = &self.client;
        let previous = &cached.token;
        let token = retry(&self.policy, "refresh space token", cancel, move || async move {
            Token::from_data(client.refresh(previous).await?)
        })
        .await?;

        info!(
            "Refreshed credentials for {} (expires {})",
            cached.repo_name, token.expires_at
        );
        self.store(&cached.repo_name, token.clone());
        Ok(token)
    }

    /// The cached token if still valid for this repository and region,
    /// otherwise a freshly acquired one.
    pub async fn ensure(
        &mut self,
        repo_name: &str,
        cloud_name: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        if self.is_valid(repo_name, region) {
            if let Some(token) = self.current() {
                return Ok(token.clone());
            }
        }
        self.acquire(repo_name, cloud_name, region, cancel).await
    }

    fn store(&mut self, repo_name: &str, token: Token) {
        self.cached = Some(CachedToken {
            repo_name: repo_name.to_string(),
            token,
        });
    }
}
