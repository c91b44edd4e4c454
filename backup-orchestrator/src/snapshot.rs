//! Snapshot records and the tags this crate reads and writes on them.

use crate::engine::classify::FailureKind;
use crate::utils::errors::{OrchestratorError, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const TAG_BACKUP_TYPE: &str = "backup-type";
pub const TAG_METADATA: &str = "metadata";
pub const TAG_FILES_PREFIX_PATH: &str = "files-prefix-path";

/// What a snapshot holds, recorded in the `backup-type` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// A single uploaded path, restored as-is.
    #[default]
    File,
    /// Application data spread over several prefix paths.
    App,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::File => "file",
            BackupType::App => "app",
        }
    }

    /// Unknown values fall back to `File`.
    pub fn from_tag(value: &str) -> Self {
        match value {
            "app" => BackupType::App,
            _ => BackupType::File,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    #[serde(default)]
    pub backup_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub backup_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub data_added: u64,
    #[serde(default)]
    pub total_files_processed: u64,
    #[serde(default)]
    pub total_bytes_processed: u64,
}

/// One entry of `snapshots --json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub summary: Option<SnapshotSummary>,
}

/// One `restore` call: a path inside the snapshot and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePath {
    pub source: String,
    pub target: String,
}

impl Snapshot {
    /// Matches the full id or any prefix of it (short ids included).
    pub fn matches_id(&self, id: &str) -> bool {
        !id.is_empty() && (self.id.starts_with(id) || self.short_id == id)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        tag_value(&self.tags, key)
    }

    pub fn backup_type(&self) -> BackupType {
        backup_type(&self.tags)
    }

    pub fn metadata(&self) -> Result<Option<String>> {
        self.tag(TAG_METADATA).map(decode_metadata).transpose()
    }

    /// Paths to restore and their destinations under `target`.
    ///
    /// File snapshots restore their single uploaded path into `target`. App
    /// snapshots restore every recorded prefix path into the matching
    /// directory under `target`.
    pub fn restore_plan(&self, target: &str) -> Result<Vec<RestorePath>> {
        match self.backup_type() {
            BackupType::File => {
                let source = self.paths.first().ok_or_else(|| {
                    OrchestratorError::engine(
                        FailureKind::SnapshotNotFound,
                        format!("snapshot {} records no paths", self.short_id),
                    )
                })?;
                Ok(vec![RestorePath {
                    source: source.clone(),
                    target: target.to_string(),
                }])
            }
            BackupType::App => Ok(decode_prefix_paths(&self.tags)?
                .into_iter()
                .map(|source| {
                    let relative = source.trim_start_matches('/');
                    RestorePath {
                        target: Path::new(target).join(relative).display().to_string(),
                        source,
                    }
                })
                .collect()),
        }
    }
}

/// The snapshot `id` names: an exact full or short id wins, otherwise the
/// single snapshot whose id starts with it. A prefix shared by several
/// snapshots is rejected like an unknown id.
pub fn find_by_id(snapshots: Vec<Snapshot>, id: &str) -> Result<Snapshot> {
    let not_found = |reason: String| OrchestratorError::engine(FailureKind::SnapshotNotFound, reason);

    let mut candidates: Vec<Snapshot> = snapshots.into_iter().filter(|s| s.matches_id(id)).collect();
    if let Some(pos) = candidates.iter().position(|s| s.id == id || s.short_id == id) {
        return Ok(candidates.swap_remove(pos));
    }
    match candidates.len() {
        0 => Err(not_found(format!("no matching ID found for snapshot {}", id))),
        1 => Ok(candidates.swap_remove(0)),
        n => Err(not_found(format!(
            "snapshot prefix {} is ambiguous, {} snapshots match",
            id, n
        ))),
    }
}

/// Value of the first `key=value` tag with this key.
pub fn tag_value<'a>(tags: &'a [String], key: &str) -> Option<&'a str> {
    tags.iter().find_map(|tag| match tag.split_once('=') {
        Some((k, v)) if k == key => Some(v),
        _ => None,
    })
}

pub fn backup_type(tags: &[String]) -> BackupType {
    tag_value(tags, TAG_BACKUP_TYPE)
        .map(BackupType::from_tag)
        .unwrap_or_default()
}

pub fn encode_metadata(metadata: &str) -> String {
    general_purpose::STANDARD.encode(metadata.as_bytes())
}

pub fn decode_metadata(encoded: &str) -> Result<String> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| OrchestratorError::Config(format!("invalid metadata tag: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| OrchestratorError::Config(format!("invalid metadata tag: {}", e)))
}

pub fn encode_prefix_paths(paths: &[String]) -> Result<String> {
    let json = serde_json::to_string(paths)?;
    Ok(general_purpose::STANDARD.encode(json.as_bytes()))
}

/// Decode the `files-prefix-path` tag. A missing, empty or undecodable tag
/// means the snapshot cannot be restored as an app backup.
pub fn decode_prefix_paths(tags: &[String]) -> Result<Vec<String>> {
    let not_found = |reason: &str| {
        OrchestratorError::engine(
            FailureKind::SnapshotNotFound,
            format!("{} tag {}", TAG_FILES_PREFIX_PATH, reason),
        )
    };

    let encoded = tag_value(tags, TAG_FILES_PREFIX_PATH)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| not_found("is missing"))?;
    let json = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| not_found("is not base64"))?;
    let paths: Vec<String> = serde_json::from_slice(&json).map_err(|_| not_found("is not a JSON array"))?;
    if paths.is_empty() {
        return Err(not_found("is empty"));
    }
    Ok(paths)
}

/// Output of `stats --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_file_count: u64,
    #[serde(default)]
    pub snapshots_count: u64,
}
