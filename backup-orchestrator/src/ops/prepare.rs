//! Init-or-repair, run before every backup.

use super::{OperationContext, Orchestrator};
use crate::engine::{FailureKind, ProcessSpawner};
use crate::location::RepositoryResolver;
use crate::repository::ResolvedRepository;
use crate::utils::errors::Result;
use crate::utils::retry::retry_when;
use tracing::{debug, info, warn};

impl<P: ProcessSpawner, R: RepositoryResolver> Orchestrator<P, R> {
    /// Make sure the repository exists and its index is usable.
    ///
    /// A repository that is already initialized gets `repair index` instead.
    /// Lock contention during repair is cleared with `unlock --remove-all`
    /// and the repair retried under the repair backoff policy.
    pub async fn prepare(&self, repo: &ResolvedRepository, ctx: &OperationContext) -> Result<()> {
        match self.engine.init(repo, &ctx.cancel).await {
            Ok(initialized) => {
                info!(
                    operation_id = %ctx.id,
                    "Initialized repository {} ({})",
                    repo.target.repo_name,
                    initialized.map(|i| i.id).unwrap_or_default()
                );
                Ok(())
            }
            Err(e) if e.failure_kind() == Some(FailureKind::AlreadyInitialized) => {
                debug!(operation_id = %ctx.id, "Repository {} exists, repairing index", repo.target.repo_name);
                self.repair(repo, ctx).await
            }
            Err(e) => Err(e),
        }
    }

    async fn repair(&self, repo: &ResolvedRepository, ctx: &OperationContext) -> Result<()> {
        let engine = &self.engine;
        let cancel = &ctx.cancel;
        let id = ctx.id;

        retry_when(
            &self.repair_policy,
            "repair index",
            cancel,
            |e| e.failure_kind() == Some(FailureKind::LockContention),
            move || async move {
                match engine.repair_index(repo, cancel).await {
                    Err(e) if e.failure_kind() == Some(FailureKind::LockContention) => {
                        warn!(operation_id = %id, "Repository {} is locked, removing locks", repo.target.repo_name);
                        if let Err(unlock_err) = engine.unlock_all(repo, cancel).await {
                            warn!(operation_id = %id, "Unlock failed: {}", unlock_err);
                        }
                        Err(e)
                    }
                    other => other,
                }
            },
        )
        .await
    }
}
