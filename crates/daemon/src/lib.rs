//! # Tether Daemon Library
//!
//! This crate provides the daemon (host) side of Tether: long-running PTY
//! sessions whose lifetime is independent of any single network connection.
//! Clients attach over WebSocket, receive a full scrollback replay, and may
//! disconnect and reconnect freely without terminating the hosted process.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Session Registry                      │
//! │  spawn / attach / kill / destroy_all, respawn-on-reconnect │
//! ├────────────────────────────────────────────────────────────┤
//! │   ┌───────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │   │ SessionRecord │  │  Scrollback  │  │ SessionStore  │   │
//! │   │ (PTY + conns) │  │   (100 KiB)  │  │ (collaborator)│   │
//! │   └───────────────┘  └──────────────┘  └───────────────┘   │
//! ├────────────────────────────────────────────────────────────┤
//! │                 WebSocket Duplex Bridge                    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration loading and defaults
//! - [`session`]: PTY spawning, scrollback, fan-out, registry
//! - [`store`]: metadata-store collaborator contract
//! - [`bridge`]: WebSocket duplex bridge binding connections to sessions

pub mod bridge;
pub mod config;
pub mod session;
pub mod store;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use session::{
    CloseReason, ConnectionSink, OutboundFrame, ScrollbackBuffer, SessionError, SessionId,
    SessionInfo, SessionRecord, SessionRegistry, SpawnConfig,
};
pub use store::{JsonFileStore, MemoryStore, SessionStatus, SessionStore, StoreError};
