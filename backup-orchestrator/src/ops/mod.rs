//! Operation orchestrators.
//!
//! Each operation resolves its repository, runs one or more engine commands
//! and, when the engine reports expired credentials, refreshes them and
//! reruns the failed step in a loop. The loop ends when the step succeeds,
//! the refresh fails, or the refresh budget is spent.

pub mod backup;
pub mod prepare;
pub mod regions;
pub mod restore;
pub mod snapshots;

pub use backup::{BackupOutcome, BackupRequest};
pub use regions::regions;
pub use restore::{RestoreOutcome, RestoreRequest};

use crate::config::Config;
use crate::engine::{Engine, ProcessSpawner};
use crate::location::RepositoryResolver;
use crate::repository::ResolvedRepository;
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::retry::BackoffPolicy;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Correlation id and cancellation handle for one operation, passed
/// explicitly to every step.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub id: Uuid,
    pub cancel: CancellationToken,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel,
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs operations against repositories supplied by `R`. Owns the resolver
/// so credentials are only ever refreshed by one operation at a time.
pub struct Orchestrator<P, R> {
    engine: Engine<P>,
    resolver: R,
    repair_policy: BackoffPolicy,
    max_refreshes: u32,
}

impl<P: ProcessSpawner, R: RepositoryResolver> Orchestrator<P, R> {
    pub fn new(engine: Engine<P>, resolver: R, repair_policy: BackoffPolicy, max_refreshes: u32) -> Self {
        Self {
            engine,
            resolver,
            repair_policy,
            max_refreshes,
        }
    }

    pub fn from_config(spawner: P, resolver: R, config: &Config) -> Self {
        Self::new(
            Engine::new(spawner, config.engine.clone()),
            resolver,
            config.repair.retry.clone(),
            config.engine.max_credential_refreshes,
        )
    }

    pub fn engine(&self) -> &Engine<P> {
        &self.engine
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn recovery(&self) -> CredentialRecovery {
        CredentialRecovery::new(self.max_refreshes)
    }
}

/// Refresh budget for one operation.
#[derive(Debug)]
pub(crate) struct CredentialRecovery {
    refreshes: u32,
    limit: u32,
}

impl CredentialRecovery {
    pub(crate) fn new(limit: u32) -> Self {
        Self { refreshes: 0, limit }
    }

    pub(crate) fn refreshes(&self) -> u32 {
        self.refreshes
    }

    /// Fresh credentials when `err` is an expiry and budget remains;
    /// otherwise `err` itself.
    pub(crate) async fn recover<R: RepositoryResolver>(
        &mut self,
        err: OrchestratorError,
        resolver: &mut R,
        repo_name: &str,
        ctx: &OperationContext,
    ) -> Result<ResolvedRepository> {
        if !err.is_credential_expired() {
            return Err(err);
        }
        if self.refreshes >= self.limit {
            warn!(
                operation_id = %ctx.id,
                "Credentials for {} expired again after {} refreshes, giving up",
                repo_name, self.refreshes
            );
            return Err(err);
        }

        self.refreshes += 1;
        warn!(
            operation_id = %ctx.id,
            "Credentials for {} expired, refreshing ({}/{})",
            repo_name, self.refreshes, self.limit
        );
        resolver.refresh(repo_name, &ctx.cancel).await
    }
}
