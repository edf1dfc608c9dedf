use super::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// Input text that stands for a masked secret in recordings.
const MASKED_INPUT: &str = "******";

/// One scripted answer of an offline device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    /// Input line that triggers the reply, without its newline. `" "` matches a pager continuation.
    pub input: String,
    /// Processing delay before the first chunk is written.
    pub delay: Duration,
    /// Output chunks, written one by one.
    pub chunks: Vec<String>,
}

/// Behavior of one offline device.
///
/// Replies are consumed in order: the first unconsumed reply whose input
/// matches is used. Unmatched input produces no output. The device hangs
/// up when it receives `exit`.
#[derive(Debug, Clone, Default)]
pub struct DeviceScript {
    banner: Vec<String>,
    replies: Vec<ScriptedReply>,
    refuse: Option<String>,
    login: Option<(String, String)>,
    hang_up_after: Option<usize>,
    chunk_delay: Duration,
}

impl DeviceScript {
    /// Creates a script whose banner is `banner` (written right after login).
    pub fn new(banner: impl Into<String>) -> Self {
        let banner = banner.into();
        Self {
            banner: if banner.is_empty() { Vec::new() } else { vec![banner] },
            ..Self::default()
        }
    }

    /// Adds a reply sent immediately when `input` arrives.
    pub fn reply<I, S>(self, input: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reply_after(input, Duration::ZERO, chunks)
    }

    /// Adds a reply sent after `delay` when `input` arrives.
    pub fn reply_after<I, S>(mut self, input: impl Into<String>, delay: Duration, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies.push(ScriptedReply {
            input: input.into(),
            delay,
            chunks: chunks.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Makes every connection attempt fail with `reason`.
    pub fn refuse(mut self, reason: impl Into<String>) -> Self {
        self.refuse = Some(reason.into());
        self
    }

    /// Only accepts the given login.
    pub fn expect_login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some((user.into(), password.into()));
        self
    }

    /// Closes the channel after `inputs` non-continuation inputs were handled.
    pub fn hang_up_after(mut self, inputs: usize) -> Self {
        self.hang_up_after = Some(inputs);
        self
    }

    /// Pause between consecutive chunks of one reply.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Builds a script from a recorded session.
    ///
    /// Masked secrets in the recording match any input that no other
    /// reply matches.
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, PlinkError> {
        let (banner, exchanges) = recorder.exchanges()?;
        Ok(Self {
            banner,
            replies: exchanges
                .into_iter()
                .map(|(input, chunks)| ScriptedReply {
                    input,
                    delay: Duration::ZERO,
                    chunks,
                })
                .collect(),
            ..Self::default()
        })
    }

    fn take_reply(&self, used: &mut [bool], input: &str) -> Option<ScriptedReply> {
        let exact = self
            .replies
            .iter()
            .enumerate()
            .position(|(idx, reply)| !used[idx] && reply.input == input);
        let idx = exact.or_else(|| {
            self.replies
                .iter()
                .enumerate()
                .position(|(idx, reply)| !used[idx] && reply.input == MASKED_INPUT)
        })?;
        used[idx] = true;
        self.replies.get(idx).cloned()
    }
}

#[derive(Debug, Default)]
struct ReplayLog {
    inputs: HashMap<String, Vec<String>>,
    connects: HashMap<String, usize>,
    active: usize,
    max_active: usize,
}

/// Transport serving scripted devices instead of real SSH sessions.
///
/// Devices are looked up by address; an unknown address fails to connect.
/// Every input received is logged per address for later inspection.
#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    scripts: HashMap<String, DeviceScript>,
    log: Arc<Mutex<ReplayLog>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: impl Into<String>, script: DeviceScript) -> Self {
        self.scripts.insert(address.into(), script);
        self
    }

    /// Raw inputs received by `address`, across all of its sessions.
    pub fn inputs(&self, address: &str) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.inputs.get(address).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of connection attempts made to `address`.
    pub fn connect_count(&self, address: &str) -> usize {
        self.log
            .lock()
            .map(|log| log.connects.get(address).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.log.lock().map(|log| log.max_active).unwrap_or(0)
    }

    fn with_log(log: &Mutex<ReplayLog>, f: impl FnOnce(&mut ReplayLog)) {
        if let Ok(mut guard) = log.lock() {
            f(&mut guard);
        }
    }
}

impl ShellTransport for ReplayTransport {
    fn connect(
        &self,
        device: &Device,
        credentials: &Credentials,
        _timeout: Duration,
    ) -> impl Future<Output = Result<ShellChannel, PlinkError>> + Send {
        let address = device.address.clone();
        let script = self.scripts.get(&address).cloned();
        let login = (credentials.user.clone(), credentials.password.clone());
        let log = self.log.clone();

        async move {
            Self::with_log(&log, |log| {
                *log.connects.entry(address.clone()).or_insert(0) += 1;
            });
            let script = script
                .ok_or_else(|| PlinkError::Connection(format!("no route to host {address}")))?;
            if let Some(reason) = script.refuse.as_ref() {
                return Err(PlinkError::Connection(reason.clone()));
            }
            if let Some(expected) = script.login.as_ref()
                && *expected != login
            {
                return Err(PlinkError::Connection(format!(
                    "authentication failed for {}@{}",
                    login.0, address
                )));
            }

            let (local, remote) = ShellChannel::pair(64);
            tokio::spawn(serve_device(address, script, remote, log));
            Ok(local)
        }
    }
}

async fn serve_device(
    address: String,
    script: DeviceScript,
    mut remote: ShellChannel,
    log: Arc<Mutex<ReplayLog>>,
) {
    ReplayTransport::with_log(&log, |log| {
        log.active += 1;
        log.max_active = log.max_active.max(log.active);
    });

    let mut used = vec![false; script.replies.len()];
    let mut handled = 0usize;

    'session: {
        for chunk in &script.banner {
            if remote.input.send(chunk.clone().into_bytes()).await.is_err() {
                break 'session;
            }
        }

        while let Some(bytes) = remote.output.recv().await {
            let raw = String::from_utf8_lossy(&bytes).into_owned();
            ReplayTransport::with_log(&log, |log| {
                log.inputs.entry(address.clone()).or_default().push(raw.clone());
            });
            let input = raw.trim_end_matches(['\r', '\n']);
            if input == config::EXIT_COMMAND {
                trace!("{} replay device got exit", address);
                break;
            }

            if let Some(reply) = script.take_reply(&mut used, input) {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                for (idx, chunk) in reply.chunks.into_iter().enumerate() {
                    if idx > 0 && !script.chunk_delay.is_zero() {
                        tokio::time::sleep(script.chunk_delay).await;
                    }
                    if remote.input.send(chunk.into_bytes()).await.is_err() {
                        break 'session;
                    }
                }
            }

            if input != " " {
                handled += 1;
            }
            if script.hang_up_after == Some(handled) {
                debug!("{} replay device hanging up", address);
                break;
            }
        }
    }

    ReplayTransport::with_log(&log, |log| log.active -= 1);
}
