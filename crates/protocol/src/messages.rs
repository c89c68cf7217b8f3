//! Duplex frame shapes for session connections.
//!
//! There is no envelope byte: inbound payloads are classified by whether they
//! parse as one of the known control shapes. Outbound raw terminal bytes are
//! sent unwrapped; only `exit` and `error` notifications are structured.

use serde::{Deserialize, Serialize};

/// Maximum accepted terminal width. Resize requests are clamped, not rejected.
pub const MAX_COLS: u16 = 500;

/// Maximum accepted terminal height.
pub const MAX_ROWS: u16 = 200;

/// WebSocket close code for an ordinary, retryable closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code signalling a spawn failure. Clients must not auto-reconnect
/// after receiving this code; a brand-new attach is required.
pub const CLOSE_SPAWN_FAILED: u16 = 4001;

/// Maximum length in bytes of a WebSocket close reason string.
pub const CLOSE_REASON_MAX_BYTES: usize = 123;

/// Client -> server control frames, recognized by shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Keystrokes for the process's stdin.
    Input {
        /// Raw bytes the user typed.
        data: String,
    },
    /// Terminal geometry change. Values are clamped server-side.
    Resize {
        /// Requested columns; may be out of range.
        cols: i64,
        /// Requested rows; may be out of range.
        rows: i64,
    },
}

/// The result of classifying one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Recognized `input` frame: bytes destined for the process's stdin.
    Input(Vec<u8>),
    /// Recognized `resize` frame, already clamped to valid geometry.
    Resize {
        /// Clamped columns, in `[1, MAX_COLS]`.
        cols: u16,
        /// Clamped rows, in `[1, MAX_ROWS]`.
        rows: u16,
    },
    /// Anything else: forwarded verbatim to the process as raw input.
    Raw(Vec<u8>),
}

/// Classifies an inbound payload by shape.
///
/// Payloads that parse as one of the two control frames become commands;
/// everything else falls through to raw passthrough and is never rejected.
pub fn classify_inbound(payload: &[u8]) -> Inbound {
    match serde_json::from_slice::<ControlFrame>(payload) {
        Ok(ControlFrame::Input { data }) => Inbound::Input(data.into_bytes()),
        Ok(ControlFrame::Resize { cols, rows }) => {
            let (cols, rows) = clamp_geometry(cols, rows);
            Inbound::Resize { cols, rows }
        }
        Err(_) => Inbound::Raw(payload.to_vec()),
    }
}

/// Clamps requested geometry into the accepted range.
///
/// Out-of-range values are silently normalized; a resize is never an error.
pub fn clamp_geometry(cols: i64, rows: i64) -> (u16, u16) {
    (
        cols.clamp(1, MAX_COLS as i64) as u16,
        rows.clamp(1, MAX_ROWS as i64) as u16,
    )
}

/// Server -> client structured notifications.
///
/// Each is sent at most once per connection per event; all other outbound
/// traffic is unwrapped raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// The session's process exited.
    Exit {
        /// Exit code of the process.
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
    /// Spawning the session failed; the connection closes right after.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl Notification {
    /// Serializes the notification to its JSON wire form.
    pub fn to_json(&self) -> String {
        // The two variants cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Attempts to parse a payload as a notification.
    ///
    /// Returns `None` for anything that is not one of the two shapes, which
    /// the client treats as raw terminal output.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// Truncates a close reason to the WebSocket limit on a char boundary.
pub fn truncate_close_reason(message: &str) -> String {
    if message.len() <= CLOSE_REASON_MAX_BYTES {
        return message.to_string();
    }
    let mut end = CLOSE_REASON_MAX_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
