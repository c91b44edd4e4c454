//! Restore orchestration.
//!
//! The snapshot's tags decide what gets restored: a file backup restores its
//! single path, an app backup restores each recorded prefix path on its own.
//! Paths that finished are kept across credential refreshes and not run
//! again.

use super::{OperationContext, Orchestrator};
use crate::engine::protocol::RestoreSummary;
use crate::engine::{ProcessSpawner, ProgressCallback};
use crate::location::RepositoryResolver;
use crate::repository::ResolvedRepository;
use crate::snapshot::{self, BackupType, Snapshot};
use crate::utils::errors::{OrchestratorError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub repo_name: String,
    /// Full or short snapshot id.
    pub snapshot_id: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub snapshot_id: String,
    pub backup_type: BackupType,
    /// Summary per restored snapshot path.
    pub results: BTreeMap<String, RestoreSummary>,
    pub total_bytes: u64,
}

impl RestoreOutcome {
    fn new(snapshot_id: &str) -> Self {
        Self {
            snapshot_id: snapshot_id.to_string(),
            backup_type: BackupType::File,
            results: BTreeMap::new(),
            total_bytes: 0,
        }
    }

    fn record(&mut self, path: String, summary: RestoreSummary) {
        self.total_bytes += summary.total_bytes;
        self.results.insert(path, summary);
    }
}

impl<P: ProcessSpawner, R: RepositoryResolver> Orchestrator<P, R> {
    pub async fn restore(
        &mut self,
        request: &RestoreRequest,
        ctx: &OperationContext,
        progress: ProgressCallback,
    ) -> Result<RestoreOutcome> {
        if request.target.trim().is_empty() {
            return Err(OrchestratorError::Config("restore target is empty".to_string()));
        }
        info!(
            operation_id = %ctx.id,
            "Restoring snapshot {} from {} into {}",
            request.snapshot_id, request.repo_name, request.target
        );

        let mut repo = self.resolver.resolve(&request.repo_name, &ctx.cancel).await?;
        let mut recovery = self.recovery();
        let mut outcome = RestoreOutcome::new(&request.snapshot_id);

        loop {
            let result = self
                .restore_pending(request, &repo, ctx, &progress, &mut outcome)
                .await;
            match result {
                Ok(()) => {
                    info!(
                        operation_id = %ctx.id,
                        "Restored {} path(s), {} bytes",
                        outcome.results.len(),
                        outcome.total_bytes
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    repo = recovery
                        .recover(e, &mut self.resolver, &request.repo_name, ctx)
                        .await?;
                }
            }
        }
    }

    async fn restore_pending(
        &self,
        request: &RestoreRequest,
        repo: &ResolvedRepository,
        ctx: &OperationContext,
        progress: &ProgressCallback,
        outcome: &mut RestoreOutcome,
    ) -> Result<()> {
        let snapshot = self.find_snapshot(repo, &request.snapshot_id, ctx).await?;
        outcome.snapshot_id = snapshot.id.clone();
        outcome.backup_type = snapshot.backup_type();

        for step in snapshot.restore_plan(&request.target)? {
            if outcome.results.contains_key(&step.source) {
                continue;
            }
            info!(operation_id = %ctx.id, "Restoring {} to {}", step.source, step.target);

            let run = self
                .engine
                .restore(repo, &snapshot.id, &step.source, &step.target, &ctx.cancel, progress)
                .await?;
            outcome.record(step.source, run.summary.unwrap_or_default());
        }
        Ok(())
    }

    async fn find_snapshot(&self, repo: &ResolvedRepository, snapshot_id: &str, ctx: &OperationContext) -> Result<Snapshot> {
        let snapshots = self.engine.snapshots(repo, &[], &ctx.cancel).await?;
        snapshot::find_by_id(snapshots, snapshot_id)
    }
}
