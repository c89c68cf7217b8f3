//! PTY process spawning and I/O.
//!
//! A session's process runs on an OS pseudo-terminal inside a persistent
//! shell: the configured command is launched with `exec <shell>` chained
//! after it, so when the command exits its final output and exit state stay
//! visible instead of the pane disappearing.

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::SessionId;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No registered session for the id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session's process has already exited.
    #[error("session already exited: {0}")]
    AlreadyExited(SessionId),

    /// Failed to spawn the PTY process.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the process.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer size for reading from the PTY.
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// One spawned PTY process: master handle, stdin writer, and child.
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawns a persistent shell, optionally running `command_line` first.
    ///
    /// Returns the process and the reader for its output stream. The caller
    /// owns the read loop; [`PtyProcess`] only holds the write/resize/kill
    /// handles.
    pub fn spawn(
        shell: Option<&str>,
        command_line: Option<&str>,
        cwd: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<(Self, Box<dyn Read + Send>), SessionError> {
        let shell = detect_shell(shell);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell);
        if let Some(line) = command_line {
            // The shell replaces itself after the command so the pane
            // survives the command's exit.
            cmd.args(["-c", &format!("{line}; exec {shell}")]);
        }
        cmd.cwd(cwd);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let process = PtyProcess {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            pid,
        };

        Ok((process, reader))
    }

    /// Process id of the shell, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Writes data to the process's stdin.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Resizes the PTY to the given dimensions.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    /// Terminates the process.
    pub async fn kill(&self) -> Result<(), SessionError> {
        let mut child = self.child.lock().await;
        child
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }

    /// Collects the exit code after the output stream has reached EOF.
    ///
    /// EOF means the process is gone or going; poll `try_wait` until the OS
    /// reports the status rather than blocking the runtime on `wait`.
    pub async fn collect_exit_code(&self) -> i32 {
        loop {
            {
                let mut child = self.child.lock().await;
                match child.try_wait() {
                    Ok(Some(status)) => return status.exit_code() as i32,
                    Ok(None) => {}
                    Err(_) => return -1,
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

/// Picks the hosting shell: explicit choice, then `$SHELL`, then `/bin/sh`.
fn detect_shell(shell: Option<&str>) -> String {
    if let Some(s) = shell {
        return s.to_string();
    }
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
