//! Backup Orchestrator - Main entry point
//!
//! Runs one operation against the configured storage location and prints the
//! result as JSON.

use anyhow::{Context, Result};
use backup_orchestrator::daemon::shutdown::ShutdownCoordinator;
use backup_orchestrator::ops::{self, BackupRequest, RestoreRequest};
use backup_orchestrator::snapshot::BackupType;
use backup_orchestrator::space::SpaceClient;
use backup_orchestrator::{
    utils, Config, LocationResolver, OperationContext, Orchestrator, OrchestratorError, ProgressCallback,
    ProgressEvent, TokioProcessSpawner,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a path into a repository
    Backup {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        path: String,
        #[arg(long = "type", value_enum, default_value = "file")]
        backup_type: TypeArg,
        /// Prefix path recorded for app backups (repeatable)
        #[arg(long = "prefix-path")]
        prefix_paths: Vec<String>,
        #[arg(long)]
        metadata: Option<String>,
        /// Extra key=value tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Restore a snapshot into a directory
    Restore {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        snapshot: String,
        #[arg(long)]
        target: String,
    },
    /// List snapshots
    Snapshots {
        #[arg(long)]
        repo: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Show repository size and counts
    Stats {
        #[arg(long)]
        repo: String,
    },
    /// List managed storage regions
    Regions,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TypeArg {
    File,
    App,
}

impl From<TypeArg> for BackupType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::File => BackupType::File,
            TypeArg::App => BackupType::App,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_progress() -> ProgressCallback {
    Arc::new(|event| match event {
        ProgressEvent::Started => tracing::info!("Engine started"),
        ProgressEvent::Status(status) => tracing::info!(
            "{:.1}% ({}/{} files, {}/{} bytes)",
            status.percent_done * 100.0,
            status.files_done,
            status.total_files,
            status.bytes_done,
            status.total_bytes
        ),
        ProgressEvent::Finished => tracing::info!("Engine finished"),
        ProgressEvent::Item(item) => tracing::debug!("{} {}", item.action, item.item),
        ProgressEvent::ItemError(err) => tracing::warn!("{}: {}", err.item, err.message()),
    })
}

async fn run(command: Command, config: &Config, ctx: &OperationContext) -> Result<()> {
    if let Command::Regions = command {
        let client = SpaceClient::new(config.space.clone())?;
        return print_json(&ops::regions(&client, ctx).await?);
    }

    let location = config
        .location
        .as_ref()
        .context("no [location] table in the configuration")?;
    let resolver = LocationResolver::from_config(location, config)?;
    let spawner = TokioProcessSpawner::new(
        config.engine.line_channel_capacity,
        config.engine.termination_grace(),
    );
    let mut orchestrator = Orchestrator::from_config(spawner, resolver, config);

    match command {
        Command::Backup {
            repo,
            path,
            backup_type,
            prefix_paths,
            metadata,
            tags,
        } => {
            let request = BackupRequest {
                repo_name: repo,
                path,
                backup_type: backup_type.into(),
                prefix_paths,
                metadata,
                tags,
            };
            let outcome = orchestrator.backup(&request, ctx, log_progress()).await?;
            print_json(&outcome)
        }
        Command::Restore { repo, snapshot, target } => {
            let request = RestoreRequest {
                repo_name: repo,
                snapshot_id: snapshot,
                target,
            };
            let outcome = orchestrator.restore(&request, ctx, log_progress()).await?;
            print_json(&outcome)
        }
        Command::Snapshots { repo, tags } => print_json(&orchestrator.snapshots(&repo, &tags, ctx).await?),
        Command::Stats { repo } => print_json(&orchestrator.stats(&repo, ctx).await?),
        Command::Regions => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Cancel the operation on SIGINT / SIGTERM
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let ctx = OperationContext::with_cancel(shutdown.token());
    let listener = Arc::clone(&shutdown);
    tokio::spawn(async move { listener.wait_for_signal().await });

    match run(args.command, &config, &ctx).await {
        Ok(()) => Ok(()),
        Err(e) if e.downcast_ref::<OrchestratorError>().is_some_and(OrchestratorError::is_canceled) => {
            tracing::info!(operation_id = %ctx.id, "Operation canceled");
            Ok(())
        }
        Err(e) => {
            tracing::error!(operation_id = %ctx.id, "Operation failed: {}", e);
            Err(e)
        }
    }
}
