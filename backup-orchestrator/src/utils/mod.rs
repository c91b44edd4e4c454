//! Utility modules for the backup orchestrator.

pub mod errors;
pub mod logger;
pub mod retry;

pub use errors::{OrchestratorError, Result};
pub use retry::BackoffPolicy;
