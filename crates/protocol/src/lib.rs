//! Wire protocol for Tether duplex session connections.
//!
//! One WebSocket connection serves exactly one session. Inbound payloads are
//! classified by shape: anything that parses as one of the two known control
//! frames (`input`, `resize`) is a command, everything else is forwarded to
//! the process verbatim as raw keystrokes. Outbound traffic is raw terminal
//! bytes plus two structured notifications (`exit`, `error`).

pub mod error;
pub mod handshake;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use handshake::{AttachParams, SpawnOverrides};
pub use messages::{
    classify_inbound, clamp_geometry, truncate_close_reason, ControlFrame, Inbound, Notification,
    CLOSE_NORMAL, CLOSE_REASON_MAX_BYTES, CLOSE_SPAWN_FAILED, MAX_COLS, MAX_ROWS,
};
