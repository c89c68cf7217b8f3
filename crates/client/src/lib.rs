//! # Tether Client Library
//!
//! The connecting side of Tether: a reconnecting WebSocket link to one daemon
//! session, plus an idle detector that watches the terminal stream and
//! reports when the hosted command appears to have finished working.
//!
//! The embedding UI talks to the client through two channels: it pushes
//! [`ClientCommand`]s (keystrokes, resizes) in and consumes [`SessionEvent`]s
//! (output, exit, idle, reconnect progress) out. The client owns the
//! connection lifecycle, including bounded-backoff reconnection after
//! unexpected drops.

pub mod connection;
pub mod idle;

pub use connection::{
    reconnect_delay, ClientCommand, ClientError, SessionClient, SessionEvent,
    RECONNECT_MAX_ATTEMPTS,
};
pub use idle::{IdleMonitor, IDLE_QUIET_PERIOD};
