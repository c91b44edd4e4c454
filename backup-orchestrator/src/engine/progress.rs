//! Progress relay from engine status lines to the caller.
//!
//! Status lines arrive several times per second and often repeat the same
//! percentage. The tracker turns them into a sparse event sequence: one
//! `Started`, one `Finished`, and a `Status` only when the percentage moved.

use super::protocol::{ErrorEvent, StatusUpdate, VerboseStatus};
use std::sync::Arc;

/// Percentages this close to 0.0 or 1.0 count as the start/finish sentinels.
pub const PERCENT_EPSILON: f64 = 1e-9;

/// Events delivered to the caller while an engine invocation runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started,
    Status(StatusUpdate),
    Finished,
    Item(VerboseStatus),
    ItemError(ErrorEvent),
}

/// Callback for progress updates
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// A callback that drops every event.
pub fn silent() -> ProgressCallback {
    Arc::new(|_| {})
}

/// What a status line means relative to what was already reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Started,
    Finished,
    Changed,
    Unchanged,
}

/// Per-invocation de-duplication state. A fresh engine run gets a fresh
/// tracker, so percentages may go backwards across a retry.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    started: bool,
    finished: bool,
    last_percent: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, percent: f64) -> Observation {
        let previous = self.last_percent.replace(percent);

        if percent.abs() < PERCENT_EPSILON {
            if self.started {
                return Observation::Unchanged;
            }
            self.started = true;
            return Observation::Started;
        }

        if (percent - 1.0).abs() < PERCENT_EPSILON {
            if self.finished {
                return Observation::Unchanged;
            }
            self.finished = true;
            return Observation::Finished;
        }

        match previous {
            Some(last) if last == percent => Observation::Unchanged,
            _ => Observation::Changed,
        }
    }

    /// Feed a status line and forward the resulting events to `callback`.
    pub fn relay(&mut self, status: StatusUpdate, callback: &ProgressCallback) {
        match self.observe(status.percent_done) {
            Observation::Started => {
                callback(ProgressEvent::Started);
                callback(ProgressEvent::Status(status));
            }
            Observation::Finished => {
                callback(ProgressEvent::Status(status));
                callback(ProgressEvent::Finished);
            }
            Observation::Changed => callback(ProgressEvent::Status(status)),
            Observation::Unchanged => {}
        }
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn has_finished(&self) -> bool {
        self.finished
    }
}
