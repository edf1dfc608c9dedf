use super::*;
use log::warn;
use tokio::time::{Instant, sleep};

use crate::device::{is_privileged_prompt, trailing_prompt};

/// Drives one interactive session against one device.
///
/// The automator is stateless between runs; every [`run`](Self::run) opens a
/// fresh shell through the transport and closes it before returning.
///
/// Command output is never cut short by prompt detection: each command
/// waits for its first byte up to the command window, then until the device
/// has been silent for the chunk timeout.
#[derive(Clone)]
pub struct SessionAutomator {
    options: SessionOptions,
    on_line: Option<LineCallback>,
    recorder: Option<SessionRecorder>,
}

impl SessionAutomator {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            on_line: None,
            recorder: None,
        }
    }

    /// Delivers every completed output line to `callback` as it arrives.
    pub fn with_line_callback(mut self, callback: LineCallback) -> Self {
        self.on_line = Some(callback);
        self
    }

    /// Records state changes, inputs and output chunks of each run.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Runs `commands` in order on `device` and returns the raw transcript.
    ///
    /// Errors before the shell is open are [`PlinkError::Connection`];
    /// channel failures afterwards are [`PlinkError::Session`]. Enable mode
    /// without a privileged password is rejected before connecting.
    pub async fn run<T: ShellTransport>(
        &self,
        transport: &T,
        device: &Device,
        credentials: &Credentials,
        commands: &[String],
    ) -> Result<String, PlinkError> {
        let enable_password = if self.options.enable_mode {
            Some(credentials.require_privileged_password(device)?.to_string())
        } else {
            None
        };

        record(
            self.recorder.as_ref(),
            SessionEvent::StateChanged {
                state: SessionState::Connecting,
            },
        );
        debug!("{} connecting as {}", device.address, credentials.user);

        let channel = match transport
            .connect(device, credentials, self.options.timings.connect_timeout)
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                debug!("{} connection failed: {}", device.address, err);
                record(
                    self.recorder.as_ref(),
                    SessionEvent::ConnectionClosed {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        let chunks = lines::spawn_reader(device.address.clone(), channel.output, self.on_line.clone());
        let mut session = ShellSession {
            device,
            input: channel.input,
            chunks,
            chunk_timeout: self.options.effective_chunk_timeout(),
            closed: false,
            state: SessionState::Connecting,
            recorder: self.recorder.as_ref(),
        };
        session.transition(SessionState::Authenticating);
        record(
            self.recorder.as_ref(),
            SessionEvent::ConnectionEstablished {
                device_addr: device.address.clone(),
            },
        );

        match self
            .drive(&mut session, commands, enable_password.as_deref())
            .await
        {
            Ok(transcript) => {
                session.transition(SessionState::Closed);
                Ok(transcript)
            }
            Err(err) => {
                session.transition(SessionState::Failed);
                record(
                    self.recorder.as_ref(),
                    SessionEvent::ConnectionClosed {
                        reason: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut ShellSession<'_>,
        commands: &[String],
        enable_password: Option<&str>,
    ) -> Result<String, PlinkError> {
        let timings = &self.options.timings;
        let addr = session.device.address.clone();
        let mut transcript = String::new();

        session.transition(SessionState::InitialPromptWait);
        let banner = session.read_window(timings.banner_window).await?;
        match trailing_prompt(&banner) {
            Some(prompt) => debug!("{} initial prompt {:?}", addr, prompt),
            None => debug!("{} no prompt seen in banner", addr),
        }
        transcript.push_str(&banner);

        if let Some(password) = enable_password {
            session.transition(SessionState::EnableNegotiation);
            session.send_line(config::ENABLE_COMMAND).await?;
            sleep(timings.long_settle).await;
            transcript.push_str(&session.read_window(timings.step_window).await?);

            session.send_secret(password).await?;
            sleep(timings.long_settle).await;
            let answer = session.read_window(timings.step_window).await?;
            match trailing_prompt(&answer) {
                Some(prompt) if !is_privileged_prompt(prompt) => {
                    warn!("{} still unprivileged after enable: {:?}", addr, prompt)
                }
                Some(prompt) => debug!("{} privileged prompt {:?}", addr, prompt),
                None => debug!("{} no prompt seen after enable", addr),
            }
            transcript.push_str(&answer);
        }

        if self.options.disable_paging {
            session.transition(SessionState::PagingDisable);
            session.send_line(config::DISABLE_PAGING_COMMAND).await?;
            sleep(timings.short_settle).await;
            session.read_window(timings.step_window).await?;
        }

        session.transition(SessionState::CommandLoop);
        for command in commands {
            debug!("{} exec {:?}", addr, command);
            session.send_line(command).await?;
            sleep(timings.short_settle).await;
            transcript.push_str(&session.read_window(timings.command_window).await?);
        }

        if self.options.disable_paging {
            session.transition(SessionState::PagingRestore);
            session.send_line(config::RESTORE_PAGING_COMMAND).await?;
            sleep(timings.short_settle).await;
            transcript.push_str(&session.read_window(timings.step_window).await?);
        }

        session.transition(SessionState::Closing);
        // The device may hang up as soon as it sees `exit`.
        if let Err(err) = session.send_line(config::EXIT_COMMAND).await {
            debug!("{} exit not delivered: {}", addr, err);
        }
        sleep(timings.long_settle).await;
        transcript.push_str(&session.read_window(timings.drain_window).await?);

        Ok(transcript)
    }
}

/// Controller side of an open shell.
struct ShellSession<'a> {
    device: &'a Device,
    input: Sender<Vec<u8>>,
    chunks: Receiver<String>,
    chunk_timeout: Duration,
    closed: bool,
    state: SessionState,
    recorder: Option<&'a SessionRecorder>,
}

fn record(recorder: Option<&SessionRecorder>, event: SessionEvent) {
    if let Some(recorder) = recorder
        && let Err(e) = recorder.record_event(event)
    {
        warn!("Session recording failed: {}", e);
    }
}

impl ShellSession<'_> {
    fn transition(&mut self, to: SessionState) {
        log_state(self.device, self.state, to);
        self.state = to;
        record(self.recorder, SessionEvent::StateChanged { state: to });
    }

    async fn send_raw(&mut self, data: Vec<u8>) -> Result<(), PlinkError> {
        self.input.send(data).await.map_err(|_| {
            PlinkError::Session(format!(
                "{} channel closed during {}",
                self.device.address,
                self.state.as_str()
            ))
        })
    }

    async fn send_line(&mut self, line: &str) -> Result<(), PlinkError> {
        record(self.recorder, SessionEvent::Input {
            data: line.to_string(),
        });
        self.send_raw(format!("{line}\n").into_bytes()).await
    }

    async fn send_secret(&mut self, secret: &str) -> Result<(), PlinkError> {
        record(self.recorder, SessionEvent::Input {
            data: "******".to_string(),
        });
        self.send_raw(format!("{secret}\n").into_bytes()).await
    }

    /// Inactivity-windowed read.
    ///
    /// Waits up to `initial` for the first chunk. Every chunk re-arms the
    /// timer with the chunk timeout. Returns what was accumulated when the
    /// timer fires or the stream closes. A chunk containing the pager marker
    /// is answered with a single space and does not end the read.
    async fn read_window(&mut self, initial: Duration) -> Result<String, PlinkError> {
        let mut output = String::new();
        if self.closed {
            return Ok(output);
        }

        let deadline = sleep(initial);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                chunk = self.chunks.recv() => match chunk {
                    Some(data) => {
                        if let Some(recorder) = self.recorder
                            && let Err(e) = recorder.record_raw_chunk(data.clone())
                        {
                            warn!("{} session recording failed: {}", self.device.address, e);
                        }
                        output.push_str(&data);
                        if data.contains(config::MORE_MARKER) {
                            trace!("{} pager marker, continuing", self.device.address);
                            self.send_raw(config::MORE_CONTINUE.to_vec()).await?;
                        }
                        deadline.as_mut().reset(Instant::now() + self.chunk_timeout);
                    }
                    None => {
                        debug!("{} stream closed", self.device.address);
                        self.closed = true;
                        break;
                    }
                }
            }
        }

        Ok(output)
    }
}
