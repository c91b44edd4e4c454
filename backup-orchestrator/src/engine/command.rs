//! The fixed engine command vocabulary.

/// Engine verbs this crate knows how to drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Init,
    Backup {
        path: String,
        tags: Vec<String>,
        limit_upload_kib: Option<u64>,
    },
    Restore {
        snapshot_id: String,
        path: String,
        target: String,
        /// 0 means unlimited.
        limit_download_kib: u64,
    },
    Snapshots {
        tags: Vec<String>,
    },
    Stats,
    RepairIndex,
    UnlockAll,
    Tag {
        snapshot_id: String,
        tag: String,
    },
}

impl EngineCommand {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::Init => "init",
            EngineCommand::Backup { .. } => "backup",
            EngineCommand::Restore { .. } => "restore",
            EngineCommand::Snapshots { .. } => "snapshots",
            EngineCommand::Stats => "stats",
            EngineCommand::RepairIndex => "repair index",
            EngineCommand::UnlockAll => "unlock",
            EngineCommand::Tag { .. } => "tag",
        }
    }

    /// Verbs whose output is consumed as machine-readable JSON.
    pub fn emits_json(&self) -> bool {
        matches!(
            self,
            EngineCommand::Init
                | EngineCommand::Backup { .. }
                | EngineCommand::Restore { .. }
                | EngineCommand::Snapshots { .. }
                | EngineCommand::Stats
        )
    }

    /// Verb words, placed first on the command line.
    pub fn verb_args(&self) -> Vec<String> {
        self.name().split(' ').map(str::to_string).collect()
    }

    /// Verb-specific flags and positionals, placed after the global flags.
    pub fn args(&self) -> Vec<String> {
        match self {
            EngineCommand::Init
            | EngineCommand::Stats
            | EngineCommand::RepairIndex => Vec::new(),
            EngineCommand::Backup {
                path,
                tags,
                limit_upload_kib,
            } => {
                let mut args = Vec::new();
                if let Some(limit) = limit_upload_kib {
                    args.push(format!("--limit-upload={}", limit));
                }
                for tag in tags {
                    args.push("--tag".to_string());
                    args.push(tag.clone());
                }
                args.push(path.clone());
                args
            }
            EngineCommand::Restore {
                snapshot_id,
                path,
                target,
                limit_download_kib,
            } => vec![
                format!("--limit-download={}", limit_download_kib),
                "-t".to_string(),
                target.clone(),
                format!("{}:{}", snapshot_id, path),
            ],
            EngineCommand::Snapshots { tags } => {
                let mut args = Vec::new();
                for tag in tags {
                    args.push("--tag".to_string());
                    args.push(tag.clone());
                }
                args
            }
            EngineCommand::UnlockAll => vec!["--remove-all".to_string()],
            EngineCommand::Tag { snapshot_id, tag } => {
                vec!["--add".to_string(), tag.clone(), snapshot_id.clone()]
            }
        }
    }
}
