use super::*;
use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use russh::{ChannelMsg, Pty};

const TERMINAL_TYPE: &str = "vt100";
const TERMINAL_COLS: u32 = 200;
const TERMINAL_ROWS: u32 = 80;
const TERMINAL_SPEED: u32 = 14400;

/// Remote-shell transport over SSH with password authentication.
///
/// Each connection requests a `vt100` PTY with echo disabled, starts an
/// interactive shell and spawns an I/O task that pumps bytes between the
/// channel and the returned [`ShellChannel`]. Dropping the channel's input
/// side ends the task and disconnects the client.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    security: ConnectionSecurityOptions,
}

impl SshTransport {
    pub fn new(security: ConnectionSecurityOptions) -> Self {
        Self { security }
    }

    pub fn security(&self) -> &ConnectionSecurityOptions {
        &self.security
    }

    async fn open(
        security: ConnectionSecurityOptions,
        address: String,
        credentials: Credentials,
    ) -> Result<ShellChannel, PlinkError> {
        let (host, port) = split_host_port(&address);
        let config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(config::COMMAND_WINDOW),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (host, port),
            &credentials.user,
            AuthMethod::with_password(&credentials.password),
            security.server_check.clone(),
            config,
        )
        .await
        .map_err(|e| PlinkError::Connection(e.to_string()))?;
        debug!("{} TCP connection and authentication successful", address);

        let mut channel = client
            .get_channel()
            .await
            .map_err(|e| PlinkError::Connection(format!("session creation failed: {e}")))?;
        channel
            .request_pty(
                false,
                TERMINAL_TYPE,
                TERMINAL_COLS,
                TERMINAL_ROWS,
                0,
                0,
                &[
                    (Pty::ECHO, 0),
                    (Pty::TTY_OP_ISPEED, TERMINAL_SPEED),
                    (Pty::TTY_OP_OSPEED, TERMINAL_SPEED),
                ],
            )
            .await
            .map_err(|e| PlinkError::Connection(format!("PTY request failed: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| PlinkError::Connection(format!("shell start failed: {e}")))?;
        debug!("{} Shell request successful", address);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<Vec<u8>>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<Vec<u8>>(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => match data {
                        Some(data) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                debug!("{} Failed to send data to shell: {:?}", address, e);
                                break;
                            }
                        }
                        None => {
                            debug!("{} Session controller finished, closing channel", address);
                            let _ = channel.eof().await;
                            break;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            if sender_to_user.send(data.to_vec()).await.is_err() {
                                debug!("{} Shell output receiver dropped. Closing task.", address);
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("{} Shell exited with status code: {}", address, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        Some(ChannelMsg::Eof) | None => {
                            debug!("{} Shell sent EOF.", address);
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Err(e) = client.disconnect().await {
                debug!("{} disconnect error: {}", address, e);
            }
            debug!("{} SSH I/O task ended.", address);
        });

        Ok(ShellChannel {
            input: sender_to_shell,
            output: receiver_from_shell,
        })
    }
}

impl ShellTransport for SshTransport {
    fn connect(
        &self,
        device: &Device,
        credentials: &Credentials,
        timeout: Duration,
    ) -> impl Future<Output = Result<ShellChannel, PlinkError>> + Send {
        let security = self.security.clone();
        let address = device.address.clone();
        let credentials = credentials.clone();

        async move {
            match tokio::time::timeout(timeout, Self::open(security, address.clone(), credentials))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(PlinkError::Connection(format!(
                    "connection to {address} timed out after {}s",
                    timeout.as_secs()
                ))),
            }
        }
    }
}
