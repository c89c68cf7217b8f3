//! Reconnecting WebSocket link to one daemon session.
//!
//! The client treats every disconnect as transient unless the daemon said
//! otherwise: it retries with a linearly growing, capped delay, gives up
//! after a bounded number of consecutive failures, and never retries after
//! a spawn-failure close. A successful attach resets the failure budget.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use protocol::{AttachParams, ControlFrame, Notification, CLOSE_SPAWN_FAILED};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::idle::IdleMonitor;

/// Consecutive failed attach attempts before the client gives up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

const RECONNECT_STEP_MS: u64 = 2000;
const RECONNECT_CAP_MS: u64 = 10_000;

/// How often the idle heuristic is checked while the link is up.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Depth of the command and event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Delay before reconnect attempt `attempt` (1-based): grows linearly and
/// saturates at ten seconds.
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_millis((RECONNECT_STEP_MS.saturating_mul(attempt as u64)).min(RECONNECT_CAP_MS))
}

/// Client-side connection errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Commands the embedding UI pushes into the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Keystrokes for the remote session's stdin.
    Input(Vec<u8>),
    /// The local terminal changed size.
    Resize { cols: u16, rows: u16 },
    /// Detach and stop. The remote session keeps running.
    Shutdown,
}

/// Everything the link reports back to the embedding UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The link is up and attached to the session.
    Connected,
    /// Raw terminal bytes (live output or scrollback replay).
    Output(Bytes),
    /// The remote process exited. The session stays attachable.
    Exited { exit_code: i32 },
    /// The daemon could not spawn the session. The link will not retry.
    SpawnError { message: String },
    /// The hosted command appears to have finished working.
    Idle,
    /// The link dropped unexpectedly.
    ConnectionLost,
    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
}

enum LinkOutcome {
    /// The link ended in a way worth retrying. `connected` records whether
    /// the attach ever succeeded, which refills the retry budget.
    Retry { connected: bool },
    /// The daemon told us not to come back.
    Fatal,
    /// The UI asked to stop, or stopped listening.
    Shutdown,
}

/// One reconnecting session link.
pub struct SessionClient {
    base_url: String,
    params: AttachParams,
    events: mpsc::Sender<SessionEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    idle: IdleMonitor,
}

impl SessionClient {
    /// Creates a client for the session described by `params` on the daemon
    /// at `base_url` (e.g. `ws://127.0.0.1:7070`).
    ///
    /// Returns the client plus the command and event endpoints for the
    /// embedding UI. Nothing connects until [`run`](Self::run) is awaited.
    pub fn new(
        base_url: impl Into<String>,
        params: AttachParams,
    ) -> (
        Self,
        mpsc::Sender<ClientCommand>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let idle = IdleMonitor::new(params.cols, params.rows);
        let client = Self {
            base_url: base_url.into(),
            params,
            events: event_tx,
            commands: command_rx,
            idle,
        };
        (client, command_tx, event_rx)
    }

    /// Drives the link until shutdown, a fatal close, or retry exhaustion.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut failures = 0u32;
        loop {
            match self.run_link().await {
                LinkOutcome::Shutdown => return Ok(()),
                LinkOutcome::Fatal => {
                    tracing::warn!(session_id = %self.params.session_id, "Daemon refused session, not retrying");
                    return Ok(());
                }
                LinkOutcome::Retry { connected } => {
                    if connected {
                        failures = 0;
                    }
                    failures += 1;
                    if failures > RECONNECT_MAX_ATTEMPTS {
                        return Err(ClientError::RetriesExhausted {
                            attempts: RECONNECT_MAX_ATTEMPTS,
                        });
                    }
                    let delay = reconnect_delay(failures);
                    tracing::info!(
                        session_id = %self.params.session_id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );
                    if self
                        .events
                        .send(SessionEvent::Reconnecting {
                            attempt: failures,
                            delay,
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One connection lifetime: attach, pump, classify the ending.
    async fn run_link(&mut self) -> LinkOutcome {
        let url = match self.params.connect_url(&self.base_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Bad connect url");
                return LinkOutcome::Fatal;
            }
        };

        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::debug!(error = %e, "Connect failed");
                return LinkOutcome::Retry { connected: false };
            }
        };
        if self.events.send(SessionEvent::Connected).await.is_err() {
            return LinkOutcome::Shutdown;
        }

        let (mut ws_tx, mut ws_rx) = ws.split();

        // Declare the local geometry right away so a respawned session is
        // sized correctly before its first output.
        if self
            .send_control(
                &mut ws_tx,
                ControlFrame::Resize {
                    cols: self.params.cols as i64,
                    rows: self.params.rows as i64,
                },
            )
            .await
            .is_err()
        {
            return LinkOutcome::Retry { connected: true };
        }

        let mut tick = tokio::time::interval(IDLE_POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        self.idle.note_output(&data, Instant::now());
                        if self.emit(SessionEvent::Output(Bytes::from(data))).await.is_err() {
                            return LinkOutcome::Shutdown;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let event = match Notification::parse(text.as_bytes()) {
                            Some(Notification::Exit { exit_code }) => SessionEvent::Exited { exit_code },
                            Some(Notification::Error { message }) => SessionEvent::SpawnError { message },
                            None => {
                                self.idle.note_output(text.as_bytes(), Instant::now());
                                SessionEvent::Output(Bytes::from(text.into_bytes()))
                            }
                        };
                        if self.emit(event).await.is_err() {
                            return LinkOutcome::Shutdown;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let fatal = frame
                            .as_ref()
                            .map(|f| u16::from(f.code) == CLOSE_SPAWN_FAILED)
                            .unwrap_or(false);
                        if fatal {
                            return LinkOutcome::Fatal;
                        }
                        let _ = self.emit(SessionEvent::ConnectionLost).await;
                        return LinkOutcome::Retry { connected: true };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Link error");
                        let _ = self.emit(SessionEvent::ConnectionLost).await;
                        return LinkOutcome::Retry { connected: true };
                    }
                    None => {
                        let _ = self.emit(SessionEvent::ConnectionLost).await;
                        return LinkOutcome::Retry { connected: true };
                    }
                },

                cmd = self.commands.recv() => match cmd {
                    Some(ClientCommand::Input(data)) => {
                        let frame = ControlFrame::Input {
                            data: String::from_utf8_lossy(&data).into_owned(),
                        };
                        if self.send_control(&mut ws_tx, frame).await.is_err() {
                            return LinkOutcome::Retry { connected: true };
                        }
                    }
                    Some(ClientCommand::Resize { cols, rows }) => {
                        self.params.cols = cols;
                        self.params.rows = rows;
                        self.idle.resize(cols, rows);
                        let frame = ControlFrame::Resize {
                            cols: cols as i64,
                            rows: rows as i64,
                        };
                        if self.send_control(&mut ws_tx, frame).await.is_err() {
                            return LinkOutcome::Retry { connected: true };
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return LinkOutcome::Shutdown;
                    }
                },

                _ = tick.tick() => {
                    if self.idle.poll(Instant::now())
                        && self.emit(SessionEvent::Idle).await.is_err()
                    {
                        return LinkOutcome::Shutdown;
                    }
                }
            }
        }
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }

    async fn send_control<S>(&self, ws_tx: &mut S, frame: ControlFrame) -> Result<(), ()>
    where
        S: Sink<Message> + Unpin,
    {
        let text = serde_json::to_string(&frame).map_err(|_| ())?;
        ws_tx.send(Message::Text(text)).await.map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_grows_linearly() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(2), Duration::from_millis(4000));
        assert_eq!(reconnect_delay(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_reconnect_delay_caps_at_ten_seconds() {
        assert_eq!(reconnect_delay(5), Duration::from_millis(10_000));
        assert_eq!(reconnect_delay(6), Duration::from_millis(10_000));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_input_frame_wire_shape() {
        let frame = ControlFrame::Input {
            data: "ls\n".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"input","data":"ls\n"}"#
        );
    }

    #[tokio::test]
    async fn test_fatal_close_disables_retry() {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // A daemon stand-in that refuses the session with the fatal code.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(CLOSE_SPAWN_FAILED),
                reason: "spawn failed".into(),
            })))
            .await
            .unwrap();
            while let Some(msg) = ws.next().await {
                if msg.is_err() {
                    break;
                }
            }
        });

        let params = AttachParams::new("s1", 80, 24);
        let (client, _command_tx, mut event_rx) =
            SessionClient::new(format!("ws://{addr}"), params);

        let result = tokio::time::timeout(Duration::from_secs(10), client.run())
            .await
            .expect("run returns after fatal close");
        assert!(result.is_ok());

        // The link came up once and never scheduled a retry.
        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Connected)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Reconnecting { .. })));

        let _ = server.await;
    }

    #[tokio::test]
    async fn test_client_channels_close_cleanly() {
        let params = AttachParams::new("s1", 80, 24);
        let (client, command_tx, event_rx) = SessionClient::new("ws://127.0.0.1:1", params);

        // Dropping both endpoints before run() means the first failed
        // connect attempt finds no listener and run() returns.
        drop(command_tx);
        drop(event_rx);
        let result = client.run().await;
        assert!(result.is_ok());
    }
}
