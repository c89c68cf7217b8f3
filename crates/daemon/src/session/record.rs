//! One session: a process handle, its scrollback, and attached connections.
//!
//! The record is treated as a single-writer actor: every state transition
//! (append output, prune scrollback, add/remove a connection, mark exited)
//! happens under the record's own lock. There is deliberately no registry-wide
//! lock, so sessions never serialize against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use protocol::Notification;
use tokio::sync::Mutex;

use super::connection::{CloseReason, ConnectionSink, OutboundFrame};
use super::pty::{PtyProcess, SessionError};
use super::scrollback::ScrollbackBuffer;
use super::{SessionId, SpawnConfig};

struct RecordState {
    scrollback: ScrollbackBuffer,
    connections: HashMap<u64, Arc<dyn ConnectionSink>>,
    exit_code: Option<i32>,
    cols: u16,
    rows: u16,
}

/// A live (or exited-but-resident) session.
///
/// A dead record is replaced, not mutated, by the next spawn; it stays in the
/// registry so a post-exit attach can respawn under the same id.
pub struct SessionRecord {
    id: SessionId,
    config: SpawnConfig,
    process: PtyProcess,
    alive: AtomicBool,
    state: Mutex<RecordState>,
    next_conn_id: AtomicU64,
}

impl SessionRecord {
    pub(crate) fn new(id: SessionId, config: SpawnConfig, process: PtyProcess) -> Self {
        let (cols, rows) = (config.cols.max(1), config.rows.max(1));
        Self {
            id,
            config,
            process,
            alive: AtomicBool::new(true),
            state: Mutex::new(RecordState {
                scrollback: ScrollbackBuffer::new(),
                connections: HashMap::new(),
                exit_code: None,
                cols,
                rows,
            }),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// The session id this record belongs to.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The configuration this record was spawned from.
    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Process id of the spawned shell.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Whether the process is still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Exit code of the process, once it has exited.
    pub async fn exit_code(&self) -> Option<i32> {
        self.state.lock().await.exit_code
    }

    /// Current terminal geometry.
    pub async fn geometry(&self) -> (u16, u16) {
        let state = self.state.lock().await;
        (state.cols, state.rows)
    }

    /// Number of currently attached connections.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Adds a connection to the fan-out set and replays state to it.
    ///
    /// The full scrollback goes out as one concatenated payload before any
    /// live bytes; if the process has already exited, the exit notification
    /// follows. Other connections are unaffected.
    pub async fn attach_connection(&self, sink: Arc<dyn ConnectionSink>) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if !state.scrollback.is_empty() {
            sink.try_send(OutboundFrame::Output(state.scrollback.replay()));
        }
        if let Some(exit_code) = state.exit_code {
            sink.try_send(OutboundFrame::Notification(Notification::Exit { exit_code }));
        }

        state.connections.insert(conn_id, sink);
        tracing::debug!(
            session_id = %self.id,
            conn_id,
            connections = state.connections.len(),
            "Connection attached"
        );
        conn_id
    }

    /// Removes a connection. Never affects the process.
    pub async fn detach_connection(&self, conn_id: u64) {
        let mut state = self.state.lock().await;
        if state.connections.remove(&conn_id).is_some() {
            tracing::debug!(
                session_id = %self.id,
                conn_id,
                connections = state.connections.len(),
                "Connection detached"
            );
        }
    }

    /// Appends a process output chunk to scrollback and fans it out.
    ///
    /// Broadcast is per-connection best-effort: a failed send detaches only
    /// that connection, and is never retried or buffered.
    pub async fn append_output(&self, data: Bytes) {
        let mut state = self.state.lock().await;
        state.scrollback.push(data.clone());
        Self::broadcast(&self.id, &mut state, OutboundFrame::Output(data));
    }

    /// Marks the record exited and broadcasts the exit notification once.
    ///
    /// Connections that attach later are re-delivered the same notification
    /// until a fresh spawn replaces the record.
    pub async fn mark_exited(&self, exit_code: i32) {
        self.alive.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.exit_code.is_some() {
            return;
        }
        state.exit_code = Some(exit_code);
        tracing::info!(session_id = %self.id, exit_code, "Session process exited");
        Self::broadcast(
            &self.id,
            &mut state,
            OutboundFrame::Notification(Notification::Exit { exit_code }),
        );
    }

    fn broadcast(id: &SessionId, state: &mut RecordState, frame: OutboundFrame) {
        let mut dropped = Vec::new();
        for (&conn_id, sink) in state.connections.iter() {
            if !sink.try_send(frame.clone()) {
                dropped.push(conn_id);
            }
        }
        for conn_id in dropped {
            state.connections.remove(&conn_id);
            tracing::debug!(session_id = %id, conn_id, "Dropped unreachable connection");
        }
    }

    /// Force-closes every attached connection and empties the fan-out set.
    pub async fn close_all_connections(&self, reason: CloseReason) {
        let mut state = self.state.lock().await;
        for (_, sink) in state.connections.drain() {
            sink.close(reason.clone());
        }
    }

    /// Forwards input bytes to the process's stdin.
    pub async fn write_input(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::AlreadyExited(self.id.clone()));
        }
        self.process.write(data).await
    }

    /// Resizes the PTY, remembering the new geometry.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::AlreadyExited(self.id.clone()));
        }
        self.process.resize(cols, rows).await?;
        let mut state = self.state.lock().await;
        state.cols = cols;
        state.rows = rows;
        Ok(())
    }

    /// Terminates the process.
    pub async fn kill_process(&self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::SeqCst);
        self.process.kill().await
    }

    pub(crate) fn process(&self) -> &PtyProcess {
        &self.process
    }
}

#[cfg(test)]
mod tests {
    use super::super::connection::test_support::TestSink;
    use super::*;
    use std::path::Path;

    fn test_record() -> SessionRecord {
        let config = SpawnConfig {
            cols: 80,
            rows: 24,
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let (process, _reader) =
            PtyProcess::spawn(Some("/bin/sh"), None, Path::new("/"), 80, 24).unwrap();
        SessionRecord::new("test".to_string(), config, process)
    }

    #[tokio::test]
    async fn test_attach_with_empty_scrollback_sends_nothing() {
        let record = test_record();
        let sink = Arc::new(TestSink::new());
        record.attach_connection(sink.clone()).await;
        assert!(sink.frames().is_empty());
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_attach_replays_scrollback_as_one_payload() {
        let record = test_record();
        record.append_output(Bytes::from_static(b"hello ")).await;
        record.append_output(Bytes::from_static(b"world")).await;

        let sink = Arc::new(TestSink::new());
        record.attach_connection(sink.clone()).await;

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            OutboundFrame::Output(Bytes::from_static(b"hello world"))
        );
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_fanout_preserves_order_and_content() {
        let record = test_record();
        let a = Arc::new(TestSink::new());
        let b = Arc::new(TestSink::new());
        record.attach_connection(a.clone()).await;
        record.attach_connection(b.clone()).await;

        for i in 0..10u8 {
            record.append_output(Bytes::from(vec![i])).await;
        }

        assert_eq!(a.output_bytes(), (0..10u8).collect::<Vec<_>>());
        assert_eq!(a.output_bytes(), b.output_bytes());
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_failed_send_detaches_only_that_connection() {
        let record = test_record();
        let good = Arc::new(TestSink::new());
        let stalled = Arc::new(TestSink::rejecting());
        record.attach_connection(good.clone()).await;
        record.attach_connection(stalled.clone()).await;
        assert_eq!(record.connection_count().await, 2);

        record.append_output(Bytes::from_static(b"x")).await;

        assert_eq!(record.connection_count().await, 1);
        assert_eq!(good.output_bytes(), b"x");
        // The stalled connection was silently detached, never closed.
        assert_eq!(stalled.close_reason(), None);
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_exit_notification_delivered_exactly_once_each() {
        let record = test_record();
        let a = Arc::new(TestSink::new());
        let b = Arc::new(TestSink::new());
        record.attach_connection(a.clone()).await;
        record.attach_connection(b.clone()).await;

        record.mark_exited(3).await;
        // A second report of the same exit is ignored.
        record.mark_exited(3).await;

        assert_eq!(a.exit_codes(), vec![3]);
        assert_eq!(b.exit_codes(), vec![3]);
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_late_attach_receives_replay_then_exit() {
        let record = test_record();
        record.append_output(Bytes::from_static(b"hi\n")).await;
        record.mark_exited(0).await;

        let late = Arc::new(TestSink::new());
        record.attach_connection(late.clone()).await;

        let frames = late.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], OutboundFrame::Output(Bytes::from_static(b"hi\n")));
        assert_eq!(
            frames[1],
            OutboundFrame::Notification(Notification::Exit { exit_code: 0 })
        );
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_write_input_after_exit_rejected() {
        let record = test_record();
        record.mark_exited(0).await;
        let result = record.write_input(b"ls\n").await;
        assert!(matches!(result, Err(SessionError::AlreadyExited(_))));
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_close_all_connections() {
        let record = test_record();
        let a = Arc::new(TestSink::new());
        let b = Arc::new(TestSink::new());
        record.attach_connection(a.clone()).await;
        record.attach_connection(b.clone()).await;

        record.close_all_connections(CloseReason::Normal).await;

        assert_eq!(record.connection_count().await, 0);
        assert_eq!(a.close_reason(), Some(CloseReason::Normal));
        assert_eq!(b.close_reason(), Some(CloseReason::Normal));
        let _ = record.kill_process().await;
    }

    #[tokio::test]
    async fn test_resize_updates_geometry() {
        let record = test_record();
        record.resize(120, 40).await.unwrap();
        assert_eq!(record.geometry().await, (120, 40));
        let _ = record.kill_process().await;
    }
}
