//! Engine subprocess driver.
//!
//! One OS process per invocation. Two reader tasks forward stdout and stderr
//! as discrete lines onto a single channel, and a supervisor task waits for
//! the process to exit or for the invocation's cancellation token to fire,
//! in which case the process is sent SIGTERM and, after a grace period,
//! killed. The channel closes once both pipes reach EOF.

use crate::utils::errors::{OrchestratorError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub canceled: bool,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        !self.canceled && self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.canceled, self.code) {
            (true, _) => "canceled".to_string(),
            (false, Some(code)) => format!("exit status {}", code),
            (false, None) => "terminated by signal".to_string(),
        }
    }
}

/// A single engine call. Built per call and never reused.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// The complete child environment; nothing is inherited implicitly.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl CommandInvocation {
    /// Program and arguments joined for logging. Arguments never carry secrets.
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// First argument, which is always the engine verb.
    pub fn verb(&self) -> Option<String> {
        self.args.first().map(|arg| arg.to_string_lossy().into_owned())
    }
}

/// Handle on a running invocation.
pub struct RunningCommand {
    lines: mpsc::Receiver<OutputLine>,
    exit: oneshot::Receiver<ExitOutcome>,
    cancel: CancellationToken,
    program: String,
}

impl RunningCommand {
    pub fn new(
        lines: mpsc::Receiver<OutputLine>,
        exit: oneshot::Receiver<ExitOutcome>,
        cancel: CancellationToken,
        program: impl Into<String>,
    ) -> Self {
        Self {
            lines,
            exit,
            cancel,
            program: program.into(),
        }
    }

    /// Next output line, or `None` once both pipes are closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Ask the supervisor to stop the process. Safe to call repeatedly.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Wait for the process to exit. Unread lines are discarded.
    pub async fn wait(self) -> Result<ExitOutcome> {
        let RunningCommand {
            lines,
            exit,
            program,
            ..
        } = self;
        drop(lines);
        exit.await.map_err(|_| OrchestratorError::Spawn {
            program,
            message: "process supervisor stopped without an exit status".to_string(),
        })
    }
}

/// Starts engine processes. The seam between orchestration and the OS.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, invocation: CommandInvocation) -> Result<RunningCommand>;
}

/// Spawner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct TokioProcessSpawner {
    channel_capacity: usize,
    grace: Duration,
}

impl TokioProcessSpawner {
    pub fn new(channel_capacity: usize, grace: Duration) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            grace,
        }
    }
}

impl Default for TokioProcessSpawner {
    fn default() -> Self {
        Self::new(1024, Duration::from_secs(5))
    }
}

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(&self, invocation: CommandInvocation) -> Result<RunningCommand> {
        let program = invocation.program.display().to_string();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| OrchestratorError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;
        debug!("Spawned {} (pid {:?})", program, child.id());

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let (exit_tx, exit_rx) = oneshot::channel();
        let cancel = invocation.cancel.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            let outcome = supervise(child, cancel, grace).await;
            let _ = exit_tx.send(outcome);
        });

        Ok(RunningCommand::new(rx, exit_rx, invocation.cancel, program))
    }
}

/// Forward lines until EOF. Bytes that are not UTF-8 (raw file names) are
/// replaced rather than ending the stream. Once the receiver is gone the pipe
/// is still drained so the child never blocks on a full pipe.
async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !receiver_open {
                    continue;
                }
                let text = decode_line(&buf);
                if tx.send(OutputLine { stream, text }).await.is_err() {
                    receiver_open = false;
                }
            }
            Err(e) => {
                warn!("Failed to read engine {:?}: {}", stream, e);
                break;
            }
        }
    }
}

/// One output line without its terminator, lossily decoded.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn supervise(mut child: Child, cancel: CancellationToken, grace: Duration) -> ExitOutcome {
    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    match status {
        Some(Ok(status)) => ExitOutcome {
            code: status.code(),
            canceled: false,
        },
        Some(Err(e)) => {
            warn!("Failed to wait for engine process: {}", e);
            ExitOutcome {
                code: None,
                canceled: false,
            }
        }
        None => {
            terminate(&mut child, grace).await;
            ExitOutcome {
                code: None,
                canceled: true,
            }
        }
    }
}

/// SIGTERM first so the engine can release its repository lock, then kill.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!("SIGTERM to engine pid {} failed: {}", pid, e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!("Engine process exited after termination request"),
        Err(_) => {
            warn!("Engine did not exit within {:?}, killing", grace);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill engine process: {}", e);
            }
        }
    }
}
