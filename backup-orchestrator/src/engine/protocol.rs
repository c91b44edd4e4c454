//! Line protocol emitted by the engine when run with `--json`.
//!
//! Every line is a JSON object discriminated by `message_type`. Lines that do
//! not decode (plain-text fatal messages, listing output, unknown message
//! types) are handed back verbatim for the caller to classify.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Periodic progress report. Restore reports use `files_restored` /
/// `bytes_restored`, which are folded into the same fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub percent_done: f64,
    #[serde(default)]
    pub seconds_elapsed: u64,
    #[serde(default)]
    pub seconds_remaining: Option<u64>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default, alias = "files_restored")]
    pub files_done: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default, alias = "bytes_restored")]
    pub bytes_done: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub current_files: Vec<String>,
}

/// Per-item report, emitted with `--verbose`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerboseStatus {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub data_size: u64,
    #[serde(default)]
    pub data_size_in_repo: u64,
    #[serde(default)]
    pub metadata_size: u64,
    #[serde(default)]
    pub total_files: u64,
}

/// Final report of a `backup` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub dirs_new: u64,
    #[serde(default)]
    pub dirs_changed: u64,
    #[serde(default)]
    pub dirs_unmodified: u64,
    #[serde(default)]
    pub data_blobs: u64,
    #[serde(default)]
    pub tree_blobs: u64,
    #[serde(default)]
    pub data_added: u64,
    #[serde(default)]
    pub total_files_processed: u64,
    #[serde(default)]
    pub total_bytes_processed: u64,
    #[serde(default)]
    pub total_duration: f64,
    /// Absent on dry runs.
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

/// Final report of a `restore` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreSummary {
    #[serde(default)]
    pub seconds_elapsed: u64,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub files_restored: u64,
    #[serde(default)]
    pub files_skipped: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub bytes_restored: u64,
    #[serde(default)]
    pub bytes_skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

/// Non-fatal error about a single item (unreadable file and the like).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub error: ErrorDetail,
    #[serde(default)]
    pub during: String,
    #[serde(default)]
    pub item: String,
}

impl ErrorEvent {
    pub fn message(&self) -> &str {
        &self.error.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initialized {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub repository: String,
}

/// A decoded protocol line. `S` is the summary shape of the running verb.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "message_type",
    rename_all = "snake_case",
    bound(deserialize = "S: DeserializeOwned")
)]
pub enum EngineMessage<S> {
    Status(StatusUpdate),
    VerboseStatus(VerboseStatus),
    Summary(S),
    Error(ErrorEvent),
    Initialized(Initialized),
}

/// Outcome of decoding one raw line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<S> {
    Message(EngineMessage<S>),
    Text(String),
}

/// Decode a raw output line, falling back to the verbatim text.
pub fn decode<S: DeserializeOwned>(line: &str) -> Decoded<S> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Decoded::Text(trimmed.to_string());
    }
    match serde_json::from_str::<EngineMessage<S>>(trimmed) {
        Ok(message) => Decoded::Message(message),
        Err(_) => Decoded::Text(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::IgnoredAny;

    #[test]
    fn test_decode_backup_status() {
        let line = r#"{"message_type":"status","percent_done":0.5,"total_files":10,"files_done":5,"total_bytes":1000,"bytes_done":500,"current_files":["/data/a.txt"]}"#;
        match decode::<BackupSummary>(line) {
            Decoded::Message(EngineMessage::Status(status)) => {
                assert!((status.percent_done - 0.5).abs() < 1e-9);
                assert_eq!(status.files_done, 5);
                assert_eq!(status.bytes_done, 500);
                assert_eq!(status.current_files, vec!["/data/a.txt".to_string()]);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_restore_status_aliases() {
        let line = r#"{"message_type":"status","seconds_elapsed":2,"percent_done":0.25,"total_files":4,"files_restored":1,"total_bytes":400,"bytes_restored":100}"#;
        match decode::<RestoreSummary>(line) {
            Decoded::Message(EngineMessage::Status(status)) => {
                assert_eq!(status.files_done, 1);
                assert_eq!(status.bytes_done, 100);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_summary() {
        let line = r#"{"message_type":"summary","files_new":3,"files_changed":1,"files_unmodified":7,"data_added":2048,"total_duration":1.5,"snapshot_id":"0123abcd"}"#;
        match decode::<BackupSummary>(line) {
            Decoded::Message(EngineMessage::Summary(summary)) => {
                assert_eq!(summary.files_new, 3);
                assert_eq!(summary.data_added, 2048);
                assert_eq!(summary.snapshot_id.as_deref(), Some("0123abcd"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_event() {
        let line = r#"{"message_type":"error","error":{"message":"permission denied"},"during":"archival","item":"/data/secret"}"#;
        match decode::<BackupSummary>(line) {
            Decoded::Message(EngineMessage::Error(event)) => {
                assert_eq!(event.message(), "permission denied");
                assert_eq!(event.item, "/data/secret");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_initialized() {
        let line = r#"{"message_type":"initialized","id":"abc","repository":"s3:host/bucket/repo"}"#;
        assert!(matches!(
            decode::<IgnoredAny>(line),
            Decoded::Message(EngineMessage::Initialized(_))
        ));
    }

    #[test]
    fn test_decode_plain_text_and_unknown_type() {
        assert_eq!(
            decode::<IgnoredAny>("Fatal: wrong password or no key found"),
            Decoded::Text("Fatal: wrong password or no key found".to_string())
        );

        let line = r#"{"message_type":"exit_error","code":1,"message":"repository does not exist"}"#;
        assert_eq!(decode::<IgnoredAny>(line), Decoded::Text(line.to_string()));
    }
}
