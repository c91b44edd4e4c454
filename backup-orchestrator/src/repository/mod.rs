//! Repository addressing.
//!
//! Each provider turns a user-supplied endpoint (or, for managed storage, an
//! issued token) into the repository URL the engine understands. Formatting
//! is deterministic and performs no network I/O; only the filesystem
//! provider touches disk, to create its base directory.

pub mod aws;
pub mod cos;
pub mod credentials;
pub mod filesystem;
pub mod space;

pub use credentials::{Credentials, EngineEnv};

use crate::utils::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Scheme prefix the engine uses for S3-compatible backends.
pub const ENGINE_SCHEME: &str = "s3";

/// Key prefix nested under user prefixes when none is configured.
pub const DEFAULT_PREFIX: &str = "olares-backups";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Managed storage addressed through short-lived issued credentials.
    Space,
    Aws,
    TencentCloud,
    Filesystem,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Space => "space",
            ProviderKind::Aws => "aws",
            ProviderKind::TencentCloud => "tencentcloud",
            ProviderKind::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A formatted repository address. Recomputed whenever credentials rotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub kind: ProviderKind,
    pub repo_name: String,
    pub url: String,
    pub region: String,
    /// Backing cloud for managed storage (`aws` or `tencentcloud`).
    pub cloud_name: String,
}

impl RepositoryTarget {
    fn on_cos(&self) -> bool {
        match self.kind {
            ProviderKind::TencentCloud => true,
            ProviderKind::Space => self.cloud_name == cos::CLOUD_NAME,
            _ => false,
        }
    }

    /// Provider-specific `-o` options appended to every invocation.
    pub fn engine_options(&self) -> Vec<String> {
        if self.on_cos() {
            cos::engine_options(&self.region)
        } else {
            Vec::new()
        }
    }

    /// Object-storage endpoints are contacted with relaxed TLS verification.
    pub fn requires_relaxed_tls(&self) -> bool {
        self.kind != ProviderKind::Filesystem
    }
}

/// A repository ready for the engine: its address plus the credentials to
/// reach it.
#[derive(Debug, Clone)]
pub struct ResolvedRepository {
    pub target: RepositoryTarget,
    pub credentials: Credentials,
}

impl ResolvedRepository {
    pub fn env(&self) -> EngineEnv {
        EngineEnv::for_repository(&self.target, &self.credentials)
    }
}

/// Host and path segments of an endpoint, scheme stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParts {
    pub host: String,
    pub segments: Vec<String>,
}

/// Split `[scheme://]host[/path...]`. Empty path segments are dropped.
pub fn split_endpoint(endpoint: &str) -> Result<EndpointParts> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::invalid_endpoint(endpoint, "endpoint is empty"));
    }

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    if without_scheme.contains("://") {
        return Err(OrchestratorError::invalid_endpoint(endpoint, "unsupported scheme"));
    }

    let mut parts = without_scheme.split('/');
    let host = parts.next().unwrap_or_default().to_lowercase();
    if host.is_empty() {
        return Err(OrchestratorError::invalid_endpoint(endpoint, "missing host"));
    }

    let segments = parts
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(EndpointParts { host, segments })
}

/// Join user prefix segments and the prefix hint into `a/b/`, or `""` when
/// both are empty.
pub fn join_prefix(segments: &[String], prefix_hint: &str) -> String {
    let mut prefix = String::new();
    let hint = prefix_hint.trim_matches('/');
    let all = segments
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(hint))
        .filter(|s| !s.is_empty());
    for segment in all {
        prefix.push_str(segment);
        prefix.push('/');
    }
    prefix
}

fn check_repo_name(repo_name: &str) -> Result<()> {
    if repo_name.trim().is_empty() || repo_name.contains('/') {
        return Err(OrchestratorError::Config(format!(
            "invalid repository name '{}'",
            repo_name
        )));
    }
    Ok(())
}

/// Format the repository URL for a user-addressed provider.
///
/// For [`ProviderKind::Filesystem`] the endpoint is the base directory.
/// Managed storage is addressed from its token, see [`space::format_url`].
pub fn format(kind: ProviderKind, endpoint: &str, repo_name: &str, prefix_hint: &str) -> Result<String> {
    check_repo_name(repo_name)?;
    match kind {
        ProviderKind::Aws => aws::format(endpoint, repo_name, prefix_hint),
        ProviderKind::TencentCloud => cos::format(endpoint, repo_name, prefix_hint),
        ProviderKind::Filesystem => filesystem::format(Path::new(endpoint), repo_name),
        ProviderKind::Space => Err(OrchestratorError::Config(
            "managed repositories are addressed from their issued token".to_string(),
        )),
    }
}
