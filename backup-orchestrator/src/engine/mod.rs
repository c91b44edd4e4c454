//! Driving the external backup engine.
//!
//! [`Engine`] turns typed commands into [`CommandInvocation`]s, hands them to
//! a [`ProcessSpawner`] and interprets the output through [`session::drive`].

pub mod classify;
pub mod command;
pub mod driver;
pub mod progress;
pub mod protocol;
pub mod session;

pub use classify::{classify, Diagnosis, FailureKind};
pub use command::EngineCommand;
pub use driver::{CommandInvocation, ProcessSpawner, RunningCommand, TokioProcessSpawner};
pub use progress::{ProgressCallback, ProgressEvent};
pub use session::SessionOutcome;

use crate::config::EngineConfig;
use crate::repository::ResolvedRepository;
use crate::snapshot::{RepositoryStats, Snapshot};
use crate::utils::errors::{OrchestratorError, Result};
use protocol::{BackupSummary, Initialized, RestoreSummary};
use serde::de::{DeserializeOwned, IgnoredAny};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Typed front end to the engine binary.
pub struct Engine<P> {
    spawner: P,
    config: EngineConfig,
}

impl<P: ProcessSpawner> Engine<P> {
    pub fn new(spawner: P, config: EngineConfig) -> Self {
        Self { spawner, config }
    }

    pub fn spawner(&self) -> &P {
        &self.spawner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Verb words, global flags, provider options, then verb arguments.
    pub fn arguments(&self, command: &EngineCommand, repo: &ResolvedRepository) -> Vec<String> {
        let mut args = command.verb_args();
        if command.emits_json() {
            args.push("--json".to_string());
        }
        if self.config.insecure_tls && repo.target.requires_relaxed_tls() {
            args.push("--insecure-tls".to_string());
        }
        args.push("--stuck-request-timeout".to_string());
        args.push(format!("{}s", self.config.stuck_request_timeout_secs));
        args.extend(repo.target.engine_options());
        args.extend(command.args());
        args
    }

    /// Repository variables plus the configured passthrough allow-list.
    pub fn environment(&self, repo: &ResolvedRepository) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for key in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                env.insert(key.clone(), value);
            }
        }
        env.extend(repo.env().into_vars());
        env
    }

    fn invocation(&self, command: &EngineCommand, repo: &ResolvedRepository, cancel: CancellationToken) -> CommandInvocation {
        CommandInvocation {
            program: self.config.binary.clone(),
            args: self
                .arguments(command, repo)
                .into_iter()
                .map(OsString::from)
                .collect(),
            env: self.environment(repo),
            working_dir: None,
            cancel,
        }
    }

    /// Run one command. The process gets its own child token, so cancelling
    /// `cancel` reaches it but terminating it leaves `cancel` untouched.
    pub async fn run<S: DeserializeOwned>(
        &self,
        command: &EngineCommand,
        repo: &ResolvedRepository,
        cancel: &CancellationToken,
        progress: &ProgressCallback,
    ) -> Result<SessionOutcome<S>> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Canceled);
        }

        let invocation_cancel = cancel.child_token();
        let invocation = self.invocation(command, repo, invocation_cancel.clone());
        info!("Running {}", invocation.command_string());
        debug!(
            "Engine environment for {}: {}",
            command.name(),
            repo.env().diagnostic_dump()
        );

        let running = self.spawner.spawn(invocation)?;
        session::drive(running, &invocation_cancel, progress).await
    }

    /// [`Engine::run`] bounded by a wall-clock deadline.
    pub async fn run_with_deadline<S: DeserializeOwned>(
        &self,
        command: &EngineCommand,
        repo: &ResolvedRepository,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<SessionOutcome<S>> {
        let scoped = cancel.child_token();
        let progress = progress::silent();
        let run = self.run::<S>(command, repo, &scoped, &progress);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(deadline) => {
                scoped.cancel();
                match run.await {
                    Err(e) if e.is_canceled() && !cancel.is_cancelled() => Err(OrchestratorError::Deadline {
                        operation: command.name().to_string(),
                        seconds: deadline.as_secs(),
                    }),
                    other => other,
                }
            }
        }
    }

    /// Initialize the repository. Fails with `AlreadyInitialized` when it
    /// exists.
    pub async fn init(&self, repo: &ResolvedRepository, cancel: &CancellationToken) -> Result<Option<Initialized>> {
        let outcome = self
            .run::<IgnoredAny>(&EngineCommand::Init, repo, cancel, &progress::silent())
            .await?;
        Ok(outcome.initialized)
    }

    pub async fn backup(
        &self,
        repo: &ResolvedRepository,
        path: &str,
        tags: Vec<String>,
        cancel: &CancellationToken,
        progress: &ProgressCallback,
    ) -> Result<SessionOutcome<BackupSummary>> {
        let command = EngineCommand::Backup {
            path: path.to_string(),
            tags,
            limit_upload_kib: self.config.limit_upload_kib,
        };
        self.run(&command, repo, cancel, progress).await
    }

    pub async fn restore(
        &self,
        repo: &ResolvedRepository,
        snapshot_id: &str,
        path: &str,
        target: &str,
        cancel: &CancellationToken,
        progress: &ProgressCallback,
    ) -> Result<SessionOutcome<RestoreSummary>> {
        let command = EngineCommand::Restore {
            snapshot_id: snapshot_id.to_string(),
            path: path.to_string(),
            target: target.to_string(),
            limit_download_kib: self.config.limit_download_kib,
        };
        self.run(&command, repo, cancel, progress).await
    }

    /// List snapshots, oldest first.
    pub async fn snapshots(
        &self,
        repo: &ResolvedRepository,
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Snapshot>> {
        let command = EngineCommand::Snapshots { tags: tags.to_vec() };
        let outcome = self
            .run_with_deadline::<IgnoredAny>(&command, repo, cancel, self.config.listing_deadline())
            .await?;

        let text = outcome.stdout_text.join("\n");
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<Snapshot> = serde_json::from_str(&text)?;
        snapshots.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(snapshots)
    }

    pub async fn stats(&self, repo: &ResolvedRepository, cancel: &CancellationToken) -> Result<RepositoryStats> {
        let outcome = self
            .run_with_deadline::<IgnoredAny>(&EngineCommand::Stats, repo, cancel, self.config.stats_deadline())
            .await?;

        let text = outcome.stdout_text.join("\n");
        Ok(serde_json::from_str(text.trim())?)
    }

    pub async fn repair_index(&self, repo: &ResolvedRepository, cancel: &CancellationToken) -> Result<()> {
        self.run::<IgnoredAny>(&EngineCommand::RepairIndex, repo, cancel, &progress::silent())
            .await
            .map(|_| ())
    }

    pub async fn unlock_all(&self, repo: &ResolvedRepository, cancel: &CancellationToken) -> Result<()> {
        self.run::<IgnoredAny>(&EngineCommand::UnlockAll, repo, cancel, &progress::silent())
            .await
            .map(|_| ())
    }

    pub async fn tag(
        &self,
        repo: &ResolvedRepository,
        snapshot_id: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let command = EngineCommand::Tag {
            snapshot_id: snapshot_id.to_string(),
            tag: tag.to_string(),
        };
        self.run::<IgnoredAny>(&command, repo, cancel, &progress::silent())
            .await
            .map(|_| ())
    }
}
