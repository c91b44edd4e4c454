//! Snapshot listing, repository stats and snapshot tagging.

use super::{OperationContext, Orchestrator};
use crate::engine::{FailureKind, ProcessSpawner};
use crate::location::RepositoryResolver;
use crate::snapshot::{RepositoryStats, Snapshot};
use crate::utils::errors::Result;
use tracing::{debug, info};

impl<P: ProcessSpawner, R: RepositoryResolver> Orchestrator<P, R> {
    /// Snapshots oldest first, optionally filtered by tags. A repository that
    /// does not exist yet has no snapshots.
    pub async fn snapshots(&mut self, repo_name: &str, tags: &[String], ctx: &OperationContext) -> Result<Vec<Snapshot>> {
        let mut repo = self.resolver.resolve(repo_name, &ctx.cancel).await?;
        let mut recovery = self.recovery();

        loop {
            let result = self.engine.snapshots(&repo, tags, &ctx.cancel).await;
            match result {
                Ok(snapshots) => {
                    debug!(operation_id = %ctx.id, "{} has {} snapshot(s)", repo_name, snapshots.len());
                    return Ok(snapshots);
                }
                Err(e) if e.failure_kind() == Some(FailureKind::RepositoryMissing) => {
                    debug!(operation_id = %ctx.id, "{} does not exist yet", repo_name);
                    return Ok(Vec::new());
                }
                Err(e) => repo = recovery.recover(e, &mut self.resolver, repo_name, ctx).await?,
            }
        }
    }

    pub async fn stats(&mut self, repo_name: &str, ctx: &OperationContext) -> Result<RepositoryStats> {
        let mut repo = self.resolver.resolve(repo_name, &ctx.cancel).await?;
        let mut recovery = self.recovery();

        loop {
            let result = self.engine.stats(&repo, &ctx.cancel).await;
            match result {
                Ok(stats) => return Ok(stats),
                Err(e) => repo = recovery.recover(e, &mut self.resolver, repo_name, ctx).await?,
            }
        }
    }

    /// Add `tag` to an existing snapshot.
    pub async fn tag_snapshot(&mut self, repo_name: &str, snapshot_id: &str, tag: &str, ctx: &OperationContext) -> Result<()> {
        let mut repo = self.resolver.resolve(repo_name, &ctx.cancel).await?;
        let mut recovery = self.recovery();

        loop {
            let result = self.engine.tag(&repo, snapshot_id, tag, &ctx.cancel).await;
            match result {
                Ok(()) => {
                    info!(operation_id = %ctx.id, "Tagged snapshot {} with {}", snapshot_id, tag);
                    return Ok(());
                }
                Err(e) => repo = recovery.recover(e, &mut self.resolver, repo_name, ctx).await?,
            }
        }
    }
}
