//! Read loop for one engine invocation.
//!
//! Consumes the driver's line stream, relays progress, collects the summary
//! and turns a failed exit into a classified error.

use super::classify::classify;
use super::driver::{ExitOutcome, OutputStream, RunningCommand};
use super::progress::{ProgressCallback, ProgressEvent, ProgressTracker};
use super::protocol::{decode, Decoded, EngineMessage, ErrorEvent, Initialized};
use crate::utils::errors::{OrchestratorError, Result};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exit code the engine uses when a snapshot was written but some source
/// files could not be read.
pub const PARTIAL_BACKUP_EXIT_CODE: i32 = 3;

/// Everything a finished invocation produced.
#[derive(Debug, Clone)]
pub struct SessionOutcome<S> {
    pub summary: Option<S>,
    pub initialized: Option<Initialized>,
    pub item_errors: Vec<ErrorEvent>,
    /// Stdout lines that were not protocol messages (listing output).
    pub stdout_text: Vec<String>,
    pub exit: ExitOutcome,
}

impl<S> SessionOutcome<S> {
    fn new() -> Self {
        Self {
            summary: None,
            initialized: None,
            item_errors: Vec::new(),
            stdout_text: Vec::new(),
            exit: ExitOutcome {
                code: None,
                canceled: false,
            },
        }
    }
}

/// Drive `running` to completion.
///
/// Cancellation is checked before every line so no progress is delivered
/// after `cancel` fires; the process is terminated and reaped before
/// [`OrchestratorError::Canceled`] is returned.
pub async fn drive<S: DeserializeOwned>(
    mut running: RunningCommand,
    cancel: &CancellationToken,
    progress: &ProgressCallback,
) -> Result<SessionOutcome<S>> {
    let mut outcome = SessionOutcome::new();
    let mut tracker = ProgressTracker::new();
    let mut diagnostics: Vec<String> = Vec::new();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                running.terminate();
                let exit = running.wait().await?;
                debug!("Engine invocation canceled ({})", exit.describe());
                return Err(OrchestratorError::Canceled);
            }
            line = running.next_line() => line,
        };
        let Some(line) = line else { break };

        match decode::<S>(&line.text) {
            Decoded::Message(EngineMessage::Status(status)) => tracker.relay(status, progress),
            Decoded::Message(EngineMessage::VerboseStatus(item)) => {
                progress(ProgressEvent::Item(item))
            }
            Decoded::Message(EngineMessage::Error(event)) => {
                warn!("Engine reported item error on {}: {}", event.item, event.message());
                progress(ProgressEvent::ItemError(event.clone()));
                outcome.item_errors.push(event);
            }
            Decoded::Message(EngineMessage::Initialized(init)) => {
                outcome.initialized = Some(init);
            }
            Decoded::Message(EngineMessage::Summary(summary)) => {
                outcome.summary = Some(summary);
                break;
            }
            Decoded::Text(text) if text.is_empty() => {}
            Decoded::Text(text) => {
                if line.stream == OutputStream::Stdout {
                    outcome.stdout_text.push(text.clone());
                }
                if line.stream == OutputStream::Stderr {
                    debug!("engine: {}", text);
                }
                diagnostics.push(text);
            }
        }
    }

    let exit = running.wait().await?;
    outcome.exit = exit;

    if exit.canceled || cancel.is_cancelled() {
        return Err(OrchestratorError::Canceled);
    }
    if exit.success() {
        return Ok(outcome);
    }
    if outcome.summary.is_some() && exit.code == Some(PARTIAL_BACKUP_EXIT_CODE) {
        warn!(
            "Engine finished with {} unreadable item(s)",
            outcome.item_errors.len()
        );
        return Ok(outcome);
    }

    Err(failure(&diagnostics, &outcome.item_errors, exit))
}

fn failure(diagnostics: &[String], item_errors: &[ErrorEvent], exit: ExitOutcome) -> OrchestratorError {
    let mut text = diagnostics.join("\n");
    if text.trim().is_empty() {
        text = item_errors
            .iter()
            .map(|e| e.message().to_string())
            .collect::<Vec<_>>()
            .join("\n");
    }
    if text.trim().is_empty() {
        text = format!("engine failed with {}", exit.describe());
    }

    let diagnosis = classify(&text);
    OrchestratorError::engine(diagnosis.kind, diagnosis.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classify::FailureKind;
    use crate::engine::driver::OutputLine;
    use crate::engine::protocol::BackupSummary;
    use serde::de::IgnoredAny;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    fn scripted(lines: Vec<OutputLine>, code: Option<i32>) -> RunningCommand {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line).unwrap();
        }
        drop(tx);
        let (exit_tx, exit_rx) = oneshot::channel();
        exit_tx
            .send(ExitOutcome {
                code,
                canceled: false,
            })
            .unwrap();
        RunningCommand::new(rx, exit_rx, CancellationToken::new(), "restic")
    }

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, events)
    }

    #[tokio::test]
    async fn test_backup_session_collects_summary() {
        let lines = vec![
            OutputLine::stdout(r#"{"message_type":"status","percent_done":0}"#),
            OutputLine::stdout(r#"{"message_type":"status","percent_done":0}"#),
            OutputLine::stdout(r#"{"message_type":"status","percent_done":0.5}"#),
            OutputLine::stdout(r#"{"message_type":"status","percent_done":1}"#),
            OutputLine::stdout(r#"{"message_type":"summary","files_new":2,"data_added":10,"snapshot_id":"feed"}"#),
        ];
        let (callback, events) = recording();

        let outcome = drive::<BackupSummary>(scripted(lines, Some(0)), &CancellationToken::new(), &callback)
            .await
            .unwrap();

        assert_eq!(outcome.summary.unwrap().snapshot_id.as_deref(), Some("feed"));
        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| **e == ProgressEvent::Started).count(), 1);
        assert_eq!(events.iter().filter(|e| **e == ProgressEvent::Finished).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_exit_is_classified() {
        let lines = vec![OutputLine::stderr(
            "Fatal: unable to open config file: Stat: The provided token has expired.",
        )];
        let (callback, _) = recording();

        let err = drive::<IgnoredAny>(scripted(lines, Some(1)), &CancellationToken::new(), &callback)
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), Some(FailureKind::CredentialExpired));
    }

    #[tokio::test]
    async fn test_failed_exit_without_output() {
        let (callback, _) = recording();
        let err = drive::<IgnoredAny>(scripted(vec![], Some(2)), &CancellationToken::new(), &callback)
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), Some(FailureKind::Unclassified));
        assert!(err.to_string().contains("exit status 2"));
    }

    #[tokio::test]
    async fn test_partial_backup_is_success() {
        let lines = vec![
            OutputLine::stderr(r#"{"message_type":"error","error":{"message":"permission denied"},"during":"archival","item":"/data/x"}"#),
            OutputLine::stdout(r#"{"message_type":"summary","files_new":1,"snapshot_id":"beef"}"#),
        ];
        let (callback, events) = recording();

        let outcome = drive::<BackupSummary>(scripted(lines, Some(3)), &CancellationToken::new(), &callback)
            .await
            .unwrap();

        assert_eq!(outcome.item_errors.len(), 1);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ProgressEvent::ItemError(_))));
    }

    #[tokio::test]
    async fn test_listing_output_is_kept() {
        let lines = vec![OutputLine::stdout(r#"[{"id":"a"}]"#)];
        let (callback, _) = recording();

        let outcome = drive::<IgnoredAny>(scripted(lines, Some(0)), &CancellationToken::new(), &callback)
            .await
            .unwrap();

        assert_eq!(outcome.stdout_text, vec![r#"[{"id":"a"}]"#.to_string()]);
    }

    #[tokio::test]
    async fn test_canceled_before_output() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let lines = vec![OutputLine::stdout(r#"{"message_type":"status","percent_done":0}"#)];
        let (callback, events) = recording();

        let err = drive::<IgnoredAny>(scripted(lines, Some(0)), &cancel, &callback)
            .await
            .unwrap_err();

        assert!(err.is_canceled());
        assert!(events.lock().unwrap().is_empty());
    }
}
