//! Session management module.
//!
//! A session is one PTY process plus its scrollback buffer and its set of
//! attached connections. Sessions outlive connections: the registry keeps an
//! exited record resident so a later attach can respawn it under the same id.

pub mod connection;
pub mod pty;
pub mod record;
pub mod registry;
pub mod scrollback;

pub use connection::{CloseReason, ConnectionSink, OutboundFrame};
pub use pty::{PtyProcess, SessionError};
pub use record::SessionRecord;
pub use registry::{SessionInfo, SessionRegistry};
pub use scrollback::{ScrollbackBuffer, SCROLLBACK_CAP_BYTES};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique identifier for a session. Opaque, chosen by the client.
pub type SessionId = String;

/// Configuration a session is spawned from.
///
/// Immutable once a spawn is issued; a respawn always takes a fresh config,
/// usually re-read from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SpawnConfig {
    /// Command template to run. Empty means a bare interactive shell.
    pub command: String,

    /// Shell hosting the command. `None` uses `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,

    /// Working directory. Validated at spawn; falls back to the home
    /// directory when missing or not a directory.
    pub cwd: Option<PathBuf>,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Resume token appended as `--resume <token>`.
    pub resume: Option<String>,

    /// Appends `--dangerously-skip-permissions` to the command line.
    pub bypass_permissions: bool,

    /// Appends `--verbose` to the command line.
    pub verbose: bool,

    /// Model selector appended as `--model <name>`.
    pub model: Option<String>,
}

impl SpawnConfig {
    /// Builds the full command line from the template and feature flags.
    ///
    /// Returns `None` when there is no command, in which case the session is
    /// a bare interactive shell.
    pub fn command_line(&self) -> Option<String> {
        let base = self.command.trim();
        if base.is_empty() {
            return None;
        }
        let mut line = base.to_string();
        if let Some(ref token) = self.resume {
            line.push_str(" --resume ");
            line.push_str(token);
        }
        if self.bypass_permissions {
            line.push_str(" --dangerously-skip-permissions");
        }
        if self.verbose {
            line.push_str(" --verbose");
        }
        if let Some(ref model) = self.model {
            line.push_str(" --model ");
            line.push_str(model);
        }
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_empty_command() {
        let config = SpawnConfig::default();
        assert_eq!(config.command_line(), None);
    }

    #[test]
    fn test_command_line_base_only() {
        let config = SpawnConfig {
            command: "claude".to_string(),
            ..Default::default()
        };
        assert_eq!(config.command_line().as_deref(), Some("claude"));
    }

    #[test]
    fn test_command_line_all_flags() {
        let config = SpawnConfig {
            command: "claude".to_string(),
            resume: Some("tok-1".to_string()),
            bypass_permissions: true,
            verbose: true,
            model: Some("opus".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.command_line().as_deref(),
            Some("claude --resume tok-1 --dangerously-skip-permissions --verbose --model opus")
        );
    }

    #[test]
    fn test_spawn_config_serde_defaults() {
        // Stored configs may predate newer flags; missing fields default.
        let config: SpawnConfig = serde_json::from_str(r#"{"command":"claude"}"#).unwrap();
        assert_eq!(config.command, "claude");
        assert!(!config.bypass_permissions);
        assert_eq!(config.resume, None);
    }
}
