//! Backup orchestration.

use super::{OperationContext, Orchestrator};
use crate::engine::protocol::{BackupSummary, ErrorEvent};
use crate::engine::{FailureKind, ProcessSpawner, ProgressCallback};
use crate::location::RepositoryResolver;
use crate::repository::ResolvedRepository;
use crate::snapshot::{self, BackupType, TAG_BACKUP_TYPE, TAG_FILES_PREFIX_PATH, TAG_METADATA};
use crate::utils::errors::{OrchestratorError, Result};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub repo_name: String,
    /// Path handed to the engine.
    pub path: String,
    pub backup_type: BackupType,
    /// Paths recorded for app backups and restored individually later.
    pub prefix_paths: Vec<String>,
    /// Opaque caller metadata stored base64-encoded on the snapshot.
    pub metadata: Option<String>,
    /// Additional `key=value` tags.
    pub tags: Vec<String>,
}

impl BackupRequest {
    pub fn file(repo_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn app(repo_name: impl Into<String>, path: impl Into<String>, prefix_paths: Vec<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            path: path.into(),
            backup_type: BackupType::App,
            prefix_paths,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(OrchestratorError::Config("backup path is empty".to_string()));
        }
        if self.backup_type == BackupType::App && self.prefix_paths.is_empty() {
            return Err(OrchestratorError::Config(
                "app backups need at least one prefix path".to_string(),
            ));
        }
        Ok(())
    }

    /// Tags written on the snapshot: backup type, metadata, prefix paths,
    /// then caller tags.
    pub fn snapshot_tags(&self) -> Result<Vec<String>> {
        let mut tags = vec![format!("{}={}", TAG_BACKUP_TYPE, self.backup_type.as_str())];
        if let Some(metadata) = &self.metadata {
            tags.push(format!("{}={}", TAG_METADATA, snapshot::encode_metadata(metadata)));
        }
        if self.backup_type == BackupType::App {
            tags.push(format!(
                "{}={}",
                TAG_FILES_PREFIX_PATH,
                snapshot::encode_prefix_paths(&self.prefix_paths)?
            ));
        }
        tags.extend(self.tags.iter().cloned());
        Ok(tags)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub snapshot_id: String,
    pub summary: BackupSummary,
    /// Items the engine could not read. The snapshot was still written.
    pub item_errors: Vec<ErrorEvent>,
    /// Engine runs, counting reruns after credential refresh.
    pub attempts: u32,
}

impl<P: ProcessSpawner, R: RepositoryResolver> Orchestrator<P, R> {
    pub async fn backup(
        &mut self,
        request: &BackupRequest,
        ctx: &OperationContext,
        progress: ProgressCallback,
    ) -> Result<BackupOutcome> {
        request.validate()?;
        let tags = request.snapshot_tags()?;
        info!(
            operation_id = %ctx.id,
            "Backing up {} to {} ({})",
            request.path,
            request.repo_name,
            request.backup_type.as_str()
        );

        let mut repo = self.resolver.resolve(&request.repo_name, &ctx.cancel).await?;
        let mut recovery = self.recovery();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.backup_once(request, &tags, &repo, ctx, &progress).await;
            match result {
                Ok((snapshot_id, summary, item_errors)) => {
                    info!(
                        operation_id = %ctx.id,
                        "Backup of {} finished: snapshot {} ({} new, {} changed, {} bytes added, {} refreshes)",
                        request.path,
                        snapshot_id,
                        summary.files_new,
                        summary.files_changed,
                        summary.data_added,
                        recovery.refreshes()
                    );
                    return Ok(BackupOutcome {
                        snapshot_id,
                        summary,
                        item_errors,
                        attempts,
                    });
                }
                Err(e) => {
                    repo = recovery
                        .recover(e, &mut self.resolver, &request.repo_name, ctx)
                        .await?;
                }
            }
        }
    }

    async fn backup_once(
        &self,
        request: &BackupRequest,
        tags: &[String],
        repo: &ResolvedRepository,
        ctx: &OperationContext,
        progress: &ProgressCallback,
    ) -> Result<(String, BackupSummary, Vec<ErrorEvent>)> {
        self.prepare(repo, ctx).await?;

        let outcome = self
            .engine
            .backup(repo, &request.path, tags.to_vec(), &ctx.cancel, progress)
            .await?;
        if !outcome.item_errors.is_empty() {
            warn!(
                operation_id = %ctx.id,
                "Backup of {} skipped {} unreadable item(s)",
                request.path,
                outcome.item_errors.len()
            );
        }

        let summary = outcome.summary.ok_or_else(|| {
            OrchestratorError::engine(FailureKind::Unclassified, "backup finished without a summary")
        })?;
        let snapshot_id = summary.snapshot_id.clone().ok_or_else(|| {
            OrchestratorError::engine(FailureKind::Unclassified, "backup summary has no snapshot id")
        })?;
        Ok((snapshot_id, summary, outcome.item_errors))
    }
}
