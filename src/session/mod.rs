//! Interactive shell automation for a single device.
//!
//! This module drives one remote-shell session: it waits for the banner,
//! negotiates privileged mode, disables paging, runs commands in order and
//! captures everything the device prints. Output is read with an
//! inactivity window rather than by prompt matching, so slow devices and
//! paginated output are handled the same way.
//!
//! # Main Components
//!
//! - [`ShellTransport`] - Seam to the remote-shell capability
//! - [`SessionAutomator`] - Per-device state machine producing a transcript
//! - [`SshTransport`] - Transport over SSH (russh / async-ssh2-tokio)
//! - [`ReplayTransport`] - Offline scripted devices for tests and dry runs
//! - [`SessionRecorder`] - Optional JSONL recording of a session

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config;
use crate::device::{Credentials, Device};
use crate::error::PlinkError;

pub use automator::SessionAutomator;
pub use lines::{LineAssembler, Utf8Stream};
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use replay::{DeviceScript, ReplayTransport, ScriptedReply};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::SshTransport;

/// Callback receiving each completed output line.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Duplex byte channel to an interactive shell.
///
/// Bytes written to `input` are delivered to the remote shell as-is. Raw
/// output arrives on `output`; the channel closing means the remote side
/// ended the stream.
pub struct ShellChannel {
    pub input: Sender<Vec<u8>>,
    pub output: Receiver<Vec<u8>>,
}

impl ShellChannel {
    /// Creates a connected pair: the shell side and the remote side.
    ///
    /// The remote side receives what the shell side writes and vice versa.
    pub fn pair(capacity: usize) -> (ShellChannel, ShellChannel) {
        let (to_remote, from_local) = mpsc::channel(capacity);
        let (to_local, from_remote) = mpsc::channel(capacity);
        (
            ShellChannel {
                input: to_remote,
                output: from_remote,
            },
            ShellChannel {
                input: to_local,
                output: from_local,
            },
        )
    }
}

/// Remote-shell capability: connects, authenticates and opens an interactive PTY shell.
///
/// Implementations must report every failure up to and including shell
/// start as [`PlinkError::Connection`].
pub trait ShellTransport: Send + Sync {
    fn connect(
        &self,
        device: &Device,
        credentials: &Credentials,
        timeout: Duration,
    ) -> impl Future<Output = Result<ShellChannel, PlinkError>> + Send;
}

/// Lifecycle of a single device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    InitialPromptWait,
    EnableNegotiation,
    PagingDisable,
    CommandLoop,
    PagingRestore,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::InitialPromptWait => "initial_prompt_wait",
            Self::EnableNegotiation => "enable_negotiation",
            Self::PagingDisable => "paging_disable",
            Self::CommandLoop => "command_loop",
            Self::PagingRestore => "paging_restore",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Durations used by the session state machine.
///
/// Each `*_window` is the initial wait for the first byte of a response;
/// once data flows, the inactivity window (`chunk_timeout`) takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimings {
    pub connect_timeout: Duration,
    pub banner_window: Duration,
    pub step_window: Duration,
    /// Ceiling for a user command to start answering.
    pub command_window: Duration,
    pub drain_window: Duration,
    pub long_settle: Duration,
    pub short_settle: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            connect_timeout: config::CONNECT_TIMEOUT,
            banner_window: config::BANNER_WINDOW,
            step_window: config::STEP_WINDOW,
            command_window: config::COMMAND_WINDOW,
            drain_window: config::DRAIN_WINDOW,
            long_settle: config::LONG_SETTLE,
            short_settle: config::SHORT_SETTLE,
        }
    }
}

/// Options for one device run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Inactivity window; clamped to at least one second.
    pub chunk_timeout: Duration,
    /// Send `enable` and the privileged password before running commands.
    pub enable_mode: bool,
    /// Wrap the command loop in `terminal length 0` / `terminal length 24`.
    pub disable_paging: bool,
    #[serde(default)]
    pub timings: SessionTimings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_timeout: config::MIN_CHUNK_TIMEOUT,
            enable_mode: false,
            disable_paging: true,
            timings: SessionTimings::default(),
        }
    }
}

impl SessionOptions {
    /// Builds options from a chunk timeout in seconds, clamping values below one.
    pub fn with_chunk_timeout_secs(mut self, secs: u64) -> Self {
        self.chunk_timeout = Duration::from_secs(secs);
        self.chunk_timeout = self.effective_chunk_timeout();
        self
    }

    pub fn effective_chunk_timeout(&self) -> Duration {
        self.chunk_timeout.max(config::MIN_CHUNK_TIMEOUT)
    }
}

/// Splits `host:port`, defaulting to port 22.
///
/// Bracketed IPv6 (`[::1]:2222`) is supported; a bare IPv6 address is
/// returned unchanged with the default port.
pub(crate) fn split_host_port(address: &str) -> (String, u16) {
    if let Some(rest) = address.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(config::DEFAULT_SSH_PORT);
        return (host.to_string(), port);
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => {
                trace!("Unparseable port in {:?}, using default", address);
                (address.to_string(), config::DEFAULT_SSH_PORT)
            }
        },
        _ => (address.to_string(), config::DEFAULT_SSH_PORT),
    }
}

fn log_state(device: &Device, from: SessionState, to: SessionState) {
    debug!("{} {} -> {}", device.address, from.as_str(), to.as_str());
}

mod automator;
mod lines;
mod recording;
mod replay;
mod security;
mod ssh;
