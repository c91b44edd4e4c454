//! Error types for the backup orchestrator.

use crate::engine::classify::FailureKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Token error: {0}")]
    Token(String),

    #[error("Credentials for {0} repositories cannot be refreshed")]
    NotRefreshable(String),

    #[error("Engine failed ({kind}): {message}")]
    Engine { kind: FailureKind, message: String },

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{operation} did not finish within {seconds}s")]
    Deadline { operation: String, seconds: u64 },

    #[error("Operation canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Build an engine error of the given class.
    pub fn engine(kind: FailureKind, message: impl Into<String>) -> Self {
        OrchestratorError::Engine {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_endpoint(endpoint: &str, reason: impl Into<String>) -> Self {
        OrchestratorError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Classified cause, for errors that originate from engine diagnostics.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OrchestratorError::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_credential_expired(&self) -> bool {
        self.failure_kind() == Some(FailureKind::CredentialExpired)
    }

    /// Caller-initiated aborts are not failures and should be reported as such.
    pub fn is_canceled(&self) -> bool {
        matches!(self, OrchestratorError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
