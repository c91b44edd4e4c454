//! Configuration management for the backup orchestrator.
//!
//! Built-in defaults, then an optional TOML file, then environment variables
//! prefixed `BACKUP_ORCHESTRATOR_` with `__` between nested keys
//! (`BACKUP_ORCHESTRATOR_SPACE__USER_TOKEN`).

use crate::location::StorageLocation;
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "BACKUP_ORCHESTRATOR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub space: SpaceConfig,
    pub storage: StorageConfig,
    pub repair: RepairConfig,
    pub repository: RepositoryConfig,
    /// Where the binary's operations run. Library callers pass a location
    /// explicitly instead.
    pub location: Option<StorageLocation>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable, resolved through `PATH` when relative
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_stuck_request_timeout_secs")]
    pub stuck_request_timeout_secs: u64,

    /// Pass `--insecure-tls` to object-storage repositories
    #[serde(default = "default_true")]
    pub insecure_tls: bool,

    /// Caller environment variables copied into the engine process
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,

    /// Upload limit in KiB/s, unlimited when unset
    #[serde(default)]
    pub limit_upload_kib: Option<u64>,

    /// Download limit in KiB/s, 0 is unlimited
    #[serde(default)]
    pub limit_download_kib: u64,

    #[serde(default = "default_deadline_secs")]
    pub listing_deadline_secs: u64,

    #[serde(default = "default_deadline_secs")]
    pub stats_deadline_secs: u64,

    /// Time between SIGTERM and kill on cancellation
    #[serde(default = "default_termination_grace_secs")]
    pub termination_grace_secs: u64,

    #[serde(default = "default_line_channel_capacity")]
    pub line_channel_capacity: usize,

    /// Credential refreshes allowed within one operation
    #[serde(default = "default_max_credential_refreshes")]
    pub max_credential_refreshes: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Control-plane base URL
    #[serde(default)]
    pub api_url: String,

    #[serde(default = "default_acquire_path")]
    pub acquire_path: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    #[serde(default = "default_regions_path")]
    pub regions_path: String,

    #[serde(default)]
    pub user_token: String,

    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub cluster_id: String,

    /// Requested credential lifetime
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "BackoffPolicy::token")]
    pub retry: BackoffPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key prefix nested under user-supplied endpoint prefixes
    #[serde(default = "default_prefix")]
    pub default_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "BackoffPolicy::repair")]
    pub retry: BackoffPolicy,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for SpaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceConfig")
            .field("api_url", &self.api_url)
            .field("acquire_path", &self.acquire_path)
            .field("refresh_path", &self.refresh_path)
            .field("regions_path", &self.regions_path)
            .field("user_token", &if self.user_token.is_empty() { "" } else { "<redacted>" })
            .field("user_id", &self.user_id)
            .field("cluster_id", &self.cluster_id)
            .field("duration_secs", &self.duration_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_binary() -> PathBuf {
    PathBuf::from("restic")
}

fn default_stuck_request_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_env_passthrough() -> Vec<String> {
    vec!["PATH".to_string(), "HOME".to_string(), "TMPDIR".to_string()]
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_termination_grace_secs() -> u64 {
    5
}

fn default_line_channel_capacity() -> usize {
    1024
}

fn default_max_credential_refreshes() -> u32 {
    3
}

fn default_acquire_path() -> String {
    "/v1/resource/backup/v2".to_string()
}

fn default_refresh_path() -> String {
    "/v1/resource/backup/refresh".to_string()
}

fn default_regions_path() -> String {
    "/v1/resource/backup/region".to_string()
}

fn default_duration_secs() -> u64 {
    43_200 // 12h
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_prefix() -> String {
    crate::repository::DEFAULT_PREFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            stuck_request_timeout_secs: default_stuck_request_timeout_secs(),
            insecure_tls: true,
            env_passthrough: default_env_passthrough(),
            limit_upload_kib: None,
            limit_download_kib: 0,
            listing_deadline_secs: default_deadline_secs(),
            stats_deadline_secs: default_deadline_secs(),
            termination_grace_secs: default_termination_grace_secs(),
            line_channel_capacity: default_line_channel_capacity(),
            max_credential_refreshes: default_max_credential_refreshes(),
        }
    }
}

impl EngineConfig {
    pub fn listing_deadline(&self) -> Duration {
        Duration::from_secs(self.listing_deadline_secs)
    }

    pub fn stats_deadline(&self) -> Duration {
        Duration::from_secs(self.stats_deadline_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            acquire_path: default_acquire_path(),
            refresh_path: default_refresh_path(),
            regions_path: default_regions_path(),
            user_token: String::new(),
            user_id: String::new(),
            cluster_id: String::new(),
            duration_secs: default_duration_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: BackoffPolicy::token(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_prefix: default_prefix(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::repair(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}
