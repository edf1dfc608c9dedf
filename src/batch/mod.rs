//! Multi-device batch execution.
//!
//! A batch runs one command set against a device set. Devices are pulled
//! from a queue by a fixed-size worker pool (one worker by default, which
//! serializes sessions), each device yields exactly one
//! [`ExecutionResult`], and progress is pushed to a [`BatchListener`].
//!
//! # Main Components
//!
//! - [`Orchestrator`] - Owns the batch state; start/stop/summary/results
//! - [`BatchListener`] - Observer for progress, line, result and completion events
//! - [`LogStore`] - Transcript persistence seam with file and memory stores

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::config;
use crate::device::Device;
use crate::session::{SessionOptions, SessionTimings};

pub use log_store::{FileLogStore, LogStore, MemoryLogStore};
pub use orchestrator::Orchestrator;

mod log_store;
mod orchestrator;

/// Outcome of one device in a batch. Created once and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub device: Device,
    pub success: bool,
    /// Raw captured output; empty when the session never produced one.
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the transcript was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_artifact_key: Option<String>,
    pub duration_ms: u64,
}

/// Per-device progress status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Connecting,
    Success,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Counters of a batch. `total` is always the number of devices queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
    /// The batch was stopped before every device was dequeued.
    #[serde(default)]
    pub cancelled: bool,
}

/// Options of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Inactivity window in seconds; values below one are raised to one.
    pub chunk_timeout_secs: u64,
    pub enable_mode: bool,
    pub disable_paging: bool,
    /// Number of devices driven at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Groups persisted transcripts under this name when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_name: Option<String>,
    #[serde(default)]
    pub timings: SessionTimings,
}

fn default_pool_size() -> usize {
    1
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_timeout_secs: config::MIN_CHUNK_TIMEOUT.as_secs(),
            enable_mode: false,
            disable_paging: true,
            pool_size: default_pool_size(),
            schedule_name: None,
            timings: SessionTimings::default(),
        }
    }
}

impl BatchOptions {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs)
                .max(config::MIN_CHUNK_TIMEOUT),
            enable_mode: self.enable_mode,
            disable_paging: self.disable_paging,
            timings: self.timings,
        }
    }
}

/// Observer of a running batch.
///
/// Calls come from worker tasks; implementations must be quick and must
/// not block. All methods default to no-ops.
pub trait BatchListener: Send + Sync {
    /// `current` is the 1-based position while connecting and the completed count afterwards.
    ///
    /// While connecting, `current` is the completed count plus one, so with
    /// a pool larger than one several devices can report the same value. It
    /// is not a unique position.
    fn on_progress(&self, _current: usize, _total: usize, _device: &Device, _status: ProgressStatus) {}

    /// One completed output line, delivered in real time.
    fn on_line(&self, _address: &str, _display_name: &str, _line: &str) {}

    /// Exactly once per device that was dequeued.
    fn on_result(&self, _result: &ExecutionResult) {}

    /// Once, after the last in-flight device settled.
    fn on_complete(&self, _summary: &BatchSummary) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl BatchListener for NoopListener {}

/// Batch events as values, for push-channel consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Progress {
        current: usize,
        total: usize,
        device: Device,
        status: ProgressStatus,
    },
    Line {
        address: String,
        display_name: String,
        line: String,
    },
    Result(ExecutionResult),
    Completed(BatchSummary),
}

/// Listener forwarding every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: UnboundedSender<BatchEvent>,
}

impl ChannelListener {
    pub fn new(tx: UnboundedSender<BatchEvent>) -> Self {
        Self { tx }
    }
}

impl BatchListener for ChannelListener {
    fn on_progress(&self, current: usize, total: usize, device: &Device, status: ProgressStatus) {
        let _ = self.tx.send(BatchEvent::Progress {
            current,
            total,
            device: device.clone(),
            status,
        });
    }

    fn on_line(&self, address: &str, display_name: &str, line: &str) {
        let _ = self.tx.send(BatchEvent::Line {
            address: address.to_string(),
            display_name: display_name.to_string(),
            line: line.to_string(),
        });
    }

    fn on_result(&self, result: &ExecutionResult) {
        let _ = self.tx.send(BatchEvent::Result(result.clone()));
    }

    fn on_complete(&self, summary: &BatchSummary) {
        let _ = self.tx.send(BatchEvent::Completed(*summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_options_clamp_chunk_timeout() {
        let options = BatchOptions {
            chunk_timeout_secs: 0,
            ..BatchOptions::default()
        };
        assert_eq!(options.session_options().chunk_timeout, Duration::from_secs(1));

        let options = BatchOptions {
            chunk_timeout_secs: 5,
            enable_mode: true,
            ..BatchOptions::default()
        };
        let session = options.session_options();
        assert_eq!(session.chunk_timeout, Duration::from_secs(5));
        assert!(session.enable_mode);
        assert!(session.disable_paging);
    }

    #[test]
    fn pool_size_defaults_to_one_when_missing() {
        let options: BatchOptions = serde_json::from_str(
            r#"{"chunkTimeoutSecs":3,"enableMode":false,"disablePaging":true}"#,
        )
        .expect("parse");
        assert_eq!(options.pool_size, 1);
        assert_eq!(options.timings, SessionTimings::default());
    }

    #[test]
    fn progress_status_strings_match_event_contract() {
        assert_eq!(ProgressStatus::Connecting.as_str(), "connecting");
        assert_eq!(ProgressStatus::Success.as_str(), "success");
        assert_eq!(ProgressStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn channel_listener_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = ChannelListener::new(tx);
        let device = Device::new("10.0.0.1", "r1");

        listener.on_progress(1, 2, &device, ProgressStatus::Connecting);
        listener.on_line("10.0.0.1", "r1", "Router1#");

        assert!(matches!(
            rx.try_recv(),
            Ok(BatchEvent::Progress { current: 1, total: 2, status: ProgressStatus::Connecting, .. })
        ));
        assert_eq!(
            rx.try_recv().ok(),
            Some(BatchEvent::Line {
                address: "10.0.0.1".to_string(),
                display_name: "r1".to_string(),
                line: "Router1#".to_string(),
            })
        );
    }
}
