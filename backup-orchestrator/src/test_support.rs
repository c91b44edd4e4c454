//! A scripted [`ProcessSpawner`] for exercising orchestration without an
//! engine binary.

use crate::engine::driver::{CommandInvocation, ExitOutcome, OutputLine, ProcessSpawner, RunningCommand};
use crate::utils::errors::{OrchestratorError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

/// Canned output for one invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineScript {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    /// Keep running until the invocation is canceled.
    pub hang: bool,
}

impl EngineScript {
    /// Exit 0 with no output.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn stdout(lines: &[&str]) -> Self {
        Self {
            stdout: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing(stderr: &str, exit_code: i32) -> Self {
        Self {
            stderr: vec![stderr.to_string()],
            exit_code,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// Replays queued scripts in order and records every invocation.
#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    scripts: Arc<Mutex<VecDeque<EngineScript>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: EngineScript) -> &Self {
        lock(&self.scripts).push_back(script);
        self
    }

    pub fn remaining(&self) -> usize {
        lock(&self.scripts).len()
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Verb of each invocation, `repair index` joined with a space.
    pub fn verbs(&self) -> Vec<String> {
        lock(&self.invocations)
            .iter()
            .map(|inv| {
                let args: Vec<String> = inv
                    .args
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect();
                match args.as_slice() {
                    [first, second, ..] if first == "repair" => format!("{} {}", first, second),
                    [first, ..] => first.clone(),
                    [] => String::new(),
                }
            })
            .collect()
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, invocation: CommandInvocation) -> Result<RunningCommand> {
        let program = invocation.program.display().to_string();
        lock(&self.invocations).push(invocation.clone());

        let script = lock(&self.scripts).pop_front().ok_or_else(|| OrchestratorError::Spawn {
            program: program.clone(),
            message: "no scripted output left".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(script.stdout.len() + script.stderr.len() + 1);
        let (exit_tx, exit_rx) = oneshot::channel();
        let cancel = invocation.cancel.clone();

        tokio::spawn(async move {
            for line in script.stdout {
                let _ = tx.send(OutputLine::stdout(line)).await;
            }
            for line in script.stderr {
                let _ = tx.send(OutputLine::stderr(line)).await;
            }

            let outcome = if script.hang {
                cancel.cancelled().await;
                ExitOutcome {
                    code: None,
                    canceled: true,
                }
            } else {
                ExitOutcome {
                    code: Some(script.exit_code),
                    canceled: false,
                }
            };
            drop(tx);
            let _ = exit_tx.send(outcome);
        });

        Ok(RunningCommand::new(rx, exit_rx, invocation.cancel, program))
    }
}
