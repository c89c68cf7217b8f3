//! WebSocket duplex bridge.
//!
//! One physical connection serves exactly one session. Inbound payloads are
//! classified by shape (`input`, `resize`, or raw passthrough) and forwarded
//! to the session; outbound frames from the session's fan-out are queued into
//! a bounded per-connection channel so one stalled reader can never block the
//! process or its other viewers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::{
    classify_inbound, AttachParams, Inbound, CLOSE_NORMAL, CLOSE_SPAWN_FAILED,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::session::{CloseReason, ConnectionSink, OutboundFrame, SessionRegistry};

/// Per-connection outbound queue depth. When the queue is full the
/// connection is considered stalled and gets detached by the session.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

enum WriterCmd {
    Frame(OutboundFrame),
    Close(CloseReason),
}

/// [`ConnectionSink`] over a bounded channel feeding the socket writer task.
struct WsSink {
    tx: mpsc::Sender<WriterCmd>,
    closed: AtomicBool,
}

impl WsSink {
    fn new(tx: mpsc::Sender<WriterCmd>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }
}

impl ConnectionSink for WsSink {
    fn try_send(&self, frame: OutboundFrame) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.try_send(WriterCmd::Frame(frame)).is_ok()
    }

    fn close(&self, reason: CloseReason) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.try_send(WriterCmd::Close(reason));
        }
    }
}

fn close_frame_parts(reason: &CloseReason) -> (u16, String) {
    match reason {
        CloseReason::Normal => (CLOSE_NORMAL, String::new()),
        CloseReason::SpawnFailed(message) => (CLOSE_SPAWN_FAILED, message.clone()),
    }
}

/// Accept loop: one spawned handler per incoming connection.
pub async fn serve(listener: TcpListener, registry: Arc<SessionRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, registry).await {
                        tracing::debug!(peer = %peer, error = %e, "Connection handler ended");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
) -> anyhow::Result<()> {
    // Capture the request URI during the WebSocket upgrade; it carries the
    // handshake parameters.
    let mut request_uri = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_uri = Some(req.uri().to_string());
        Ok(resp)
    })
    .await?;

    let params = match request_uri.as_deref().map(AttachParams::from_request_uri) {
        Some(Ok(params)) => params,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Rejecting connection with bad handshake");
            reject(ws, &e.to_string()).await;
            return Ok(());
        }
        None => {
            reject(ws, "missing request uri").await;
            return Ok(());
        }
    };

    tracing::info!(
        session_id = %params.session_id,
        cols = params.cols,
        rows = params.rows,
        "Connection attaching"
    );

    let (ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let writer = tokio::spawn(write_loop(ws_tx, rx));
    let sink = Arc::new(WsSink::new(tx));

    let fallback = registry.fallback_config(&params);
    let (record, conn_id) = match registry
        .attach(&params.session_id, sink.clone(), fallback)
        .await
    {
        Ok(attached) => attached,
        Err(_) => {
            // The registry already queued the error frame and the fatal
            // close; wait for the writer to flush them.
            drop(sink);
            let _ = writer.await;
            return Ok(());
        }
    };

    while let Some(msg) = ws_rx.next().await {
        let payload = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session_id = %params.session_id, error = %e, "Read error");
                break;
            }
        };

        match classify_inbound(&payload) {
            Inbound::Input(data) => {
                if let Err(e) = record.write_input(&data).await {
                    tracing::debug!(session_id = %params.session_id, error = %e, "Input dropped");
                }
            }
            Inbound::Raw(data) => {
                if let Err(e) = record.write_input(&data).await {
                    tracing::debug!(session_id = %params.session_id, error = %e, "Input dropped");
                }
            }
            Inbound::Resize { cols, rows } => {
                if let Err(e) = record.resize(cols, rows).await {
                    tracing::debug!(session_id = %params.session_id, error = %e, "Resize dropped");
                }
            }
        }
    }

    // Disconnecting unregisters the connection but never cancels the process.
    record.detach_connection(conn_id).await;
    drop(sink);
    let _ = writer.await;
    Ok(())
}

async fn write_loop(
    mut ws_tx: futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<WriterCmd>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = match cmd {
            WriterCmd::Frame(OutboundFrame::Output(data)) => {
                ws_tx.send(Message::Binary(data.to_vec())).await
            }
            WriterCmd::Frame(OutboundFrame::Notification(n)) => {
                ws_tx.send(Message::Text(n.to_json())).await
            }
            WriterCmd::Close(reason) => {
                let (code, reason_text) = close_frame_parts(&reason);
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason_text.into(),
                    })))
                    .await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

async fn reject(ws: WebSocketStream<TcpStream>, reason: &str) {
    let (mut ws_tx, _) = ws.split();
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: protocol::truncate_close_reason(reason).into(),
        })))
        .await;
}
