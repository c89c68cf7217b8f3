//! The fan-out seam between a session and its attached connections.
//!
//! The registry never touches sockets directly; it talks to connections
//! through [`ConnectionSink`], which the WebSocket bridge implements with a
//! bounded queue and tests implement with an in-memory collector.

use bytes::Bytes;
use protocol::Notification;

/// Why a connection is being force-closed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Ordinary closure; the client may reconnect.
    Normal,
    /// Spawning the session failed. Non-retryable: the client must not
    /// auto-reconnect. Carries a truncated copy of the error message.
    SpawnFailed(String),
}

/// One outbound frame toward a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Unwrapped raw terminal bytes (live output or scrollback replay).
    Output(Bytes),
    /// A structured `exit` or `error` notification.
    Notification(Notification),
}

/// A session's view of one attached duplex connection.
///
/// Delivery is best-effort and must never block: a `false` return means the
/// connection is gone or stalled, and the session silently detaches it.
pub trait ConnectionSink: Send + Sync {
    /// Queues a frame without blocking. Returns `false` on failure.
    fn try_send(&self, frame: OutboundFrame) -> bool;

    /// Force-closes the connection with the given reason.
    fn close(&self, reason: CloseReason);
}
