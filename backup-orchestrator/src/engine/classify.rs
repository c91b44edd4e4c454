//! Classification of engine diagnostics into known failure causes.
//!
//! The engine reports most fatal conditions as free text (sometimes wrapped in
//! JSON, sometimes not), so the cause is recovered by matching known fragments
//! against the lower-cased text in table order.

use serde::Serialize;
use std::fmt;

/// Known causes of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Session credentials expired or were revoked; refresh and rerun.
    CredentialExpired,
    /// Another process holds a lock on the repository.
    LockContention,
    /// `init` found an existing repository. Not an error for callers.
    AlreadyInitialized,
    ConfigAccessDenied,
    BadPassword,
    RepositoryMissing,
    SnapshotNotFound,
    Unclassified,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::CredentialExpired => "credential expired",
            FailureKind::LockContention => "repository locked",
            FailureKind::AlreadyInitialized => "already initialized",
            FailureKind::ConfigAccessDenied => "config access denied",
            FailureKind::BadPassword => "bad password",
            FailureKind::RepositoryMissing => "repository missing",
            FailureKind::SnapshotNotFound => "snapshot not found",
            FailureKind::Unclassified => "unclassified",
        }
    }

    /// Whether the orchestrator has a recovery path for this cause.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::CredentialExpired | FailureKind::LockContention
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic fragments in match order. Patterns are lower-case.
const PATTERNS: &[(&str, FailureKind)] = &[
    ("token has expired", FailureKind::CredentialExpired),
    ("does not exist in our records", FailureKind::CredentialExpired),
    ("repository does not exist", FailureKind::RepositoryMissing),
    ("unable to open config file", FailureKind::ConfigAccessDenied),
    ("already locked by", FailureKind::LockContention),
    ("no matching id found", FailureKind::SnapshotNotFound),
    ("wrong password or no key found", FailureKind::BadPassword),
    (
        "master key and config already initialized",
        FailureKind::AlreadyInitialized,
    ),
    ("config file already exists", FailureKind::AlreadyInitialized),
];

/// A classified diagnostic with the raw text preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: FailureKind,
    pub message: String,
}

/// Classify engine output. The first matching pattern wins.
pub fn classify(text: &str) -> Diagnosis {
    let lowered = text.to_lowercase();
    let kind = PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unclassified);

    Diagnosis {
        kind,
        message: text.trim().to_string(),
    }
}
