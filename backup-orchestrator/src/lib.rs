//! Backup Orchestrator Library
//!
//! Drives an external restic engine for backup, restore, snapshot listing and
//! stats across S3, COS, managed "space" storage and local directories.

pub mod config;
pub mod daemon;
pub mod engine;
pub mod location;
pub mod ops;
pub mod repository;
pub mod snapshot;
pub mod space;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, FailureKind, ProgressCallback, ProgressEvent, TokioProcessSpawner};
pub use location::{LocationResolver, RepositoryResolver, StorageLocation};
pub use ops::{OperationContext, Orchestrator};
pub use utils::errors::{OrchestratorError, Result};
