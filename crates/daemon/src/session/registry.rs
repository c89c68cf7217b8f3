//! Session registry and respawn policy.
//!
//! The registry owns the map from session id to record. At most one live
//! process exists per id; spawning is idempotent against a live record, and a
//! dead record is replaced by the next spawn. Records are never reaped on
//! exit - only an explicit kill removes one, so a post-exit attach can
//! respawn the session from its last known configuration.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{truncate_close_reason, AttachParams, Notification};

use super::connection::{CloseReason, ConnectionSink, OutboundFrame};
use super::pty::{PtyProcess, SessionError, READ_BUFFER_SIZE};
use super::record::SessionRecord;
use super::{SessionId, SpawnConfig};
use crate::store::{SessionStatus, SessionStore};

/// Snapshot of one registered session, for operator introspection.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Process id of the hosting shell.
    pub pid: Option<u32>,
    /// Whether the process is still running.
    pub alive: bool,
    /// Exit code, once exited.
    pub exit_code: Option<i32>,
    /// Number of attached connections.
    pub connections: usize,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
}

/// Owns every session on this host.
///
/// Entries are independent: operations on different ids never contend, and
/// each record serializes its own state under its per-session lock.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    store: Arc<dyn SessionStore>,
    defaults: SpawnConfig,
}

impl SessionRegistry {
    /// Creates a registry over the given metadata store.
    ///
    /// `defaults` supplies the command and working directory used when a
    /// handshake carries no overrides and the store has no record.
    pub fn new(store: Arc<dyn SessionStore>, defaults: SpawnConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            defaults,
        }
    }

    /// Spawns a session, idempotently.
    ///
    /// A live record for `id` is returned unchanged. Otherwise a new PTY
    /// process is created from `config` and the new record replaces any prior
    /// dead one under the same id.
    pub async fn spawn(
        &self,
        id: &SessionId,
        config: SpawnConfig,
    ) -> Result<Arc<SessionRecord>, SessionError> {
        // The entry guard holds the id's shard for the whole
        // check-spawn-insert sequence, so concurrent spawns for the same id
        // cannot each create a process. No await happens under the guard.
        let record = match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_alive() {
                    return Ok(Arc::clone(occupied.get()));
                }
                let record = self.spawn_record(id, config)?;
                occupied.insert(Arc::clone(&record));
                record
            }
            Entry::Vacant(vacant) => {
                let record = self.spawn_record(id, config)?;
                vacant.insert(Arc::clone(&record));
                record
            }
        };

        if let Some(pid) = record.pid() {
            if let Err(e) = self.store.set_status(id, SessionStatus::Running { pid }).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to record running status");
            }
        }

        tracing::info!(
            session_id = %id,
            pid = ?record.pid(),
            command = %record.config().command,
            "Session spawned"
        );
        Ok(record)
    }

    /// Binds a connection to a session, (re)spawning if necessary.
    ///
    /// When no live record exists, the spawn configuration is resolved from
    /// the metadata store first and `fallback` second. A spawn failure is
    /// reported to this connection only: one structured error frame, then a
    /// forced close with the non-retryable reason. On success the connection
    /// joins the fan-out set and is replayed the current scrollback (plus the
    /// exit notification if the record has already exited).
    pub async fn attach(
        &self,
        id: &SessionId,
        sink: Arc<dyn ConnectionSink>,
        fallback: SpawnConfig,
    ) -> Result<(Arc<SessionRecord>, u64), SessionError> {
        let live = self
            .sessions
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .filter(|r| r.is_alive());

        let record = match live {
            Some(record) => record,
            None => {
                let config = self.resolve_config(id, fallback).await;
                match self.spawn(id, config).await {
                    Ok(record) => record,
                    Err(e) => {
                        let message = e.to_string();
                        tracing::error!(session_id = %id, error = %message, "Spawn failed on attach");
                        sink.try_send(OutboundFrame::Notification(Notification::Error {
                            message: message.clone(),
                        }));
                        sink.close(CloseReason::SpawnFailed(truncate_close_reason(&message)));
                        return Err(e);
                    }
                }
            }
        };

        let conn_id = record.attach_connection(sink).await;
        Ok((record, conn_id))
    }

    /// Kills a session: closes every attached connection with a normal
    /// reason, terminates the process, removes the record from the registry,
    /// and records the stopped status. A later attach must respawn.
    pub async fn kill(&self, id: &SessionId) -> Result<(), SessionError> {
        let (_, record) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        record.close_all_connections(CloseReason::Normal).await;
        if let Err(e) = record.kill_process().await {
            // Already-exited processes cannot be killed twice.
            tracing::debug!(session_id = %id, error = %e, "Kill on exited process");
        }

        if let Err(e) = self.store.set_status(id, SessionStatus::Stopped).await {
            tracing::warn!(session_id = %id, error = %e, "Failed to record stopped status");
        }

        tracing::info!(session_id = %id, "Session killed and removed");
        Ok(())
    }

    /// Kills every registered session. Invoked at daemon shutdown.
    pub async fn destroy_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.kill(&id).await;
        }
    }

    /// Snapshot of every registered session.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let records: Vec<Arc<SessionRecord>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            let (cols, rows) = record.geometry().await;
            infos.push(SessionInfo {
                id: record.id().clone(),
                pid: record.pid(),
                alive: record.is_alive(),
                exit_code: record.exit_code().await,
                connections: record.connection_count().await,
                cols,
                rows,
            });
        }
        infos
    }

    /// Returns the record for `id`, live or exited.
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionRecord>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Number of registered sessions, dead records included.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Builds the fallback spawn configuration for an attach handshake from
    /// its override bag and the daemon defaults.
    pub fn fallback_config(&self, params: &AttachParams) -> SpawnConfig {
        let overrides = &params.overrides;
        SpawnConfig {
            command: overrides
                .command
                .clone()
                .unwrap_or_else(|| self.defaults.command.clone()),
            shell: self.defaults.shell.clone(),
            cwd: overrides
                .cwd
                .clone()
                .map(PathBuf::from)
                .or_else(|| self.defaults.cwd.clone()),
            cols: params.cols,
            rows: params.rows,
            resume: overrides.resume.clone(),
            bypass_permissions: overrides.bypass_permissions,
            verbose: overrides.verbose,
            model: overrides.model.clone(),
        }
    }

    /// Resolves the config for a (re)spawn: stored configuration first,
    /// fallback second. The handshake geometry always wins, because the
    /// client computed it before connecting.
    async fn resolve_config(&self, id: &SessionId, fallback: SpawnConfig) -> SpawnConfig {
        match self.store.load_config(id).await {
            Ok(Some(mut stored)) => {
                if fallback.cols > 0 {
                    stored.cols = fallback.cols;
                }
                if fallback.rows > 0 {
                    stored.rows = fallback.rows;
                }
                stored
            }
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Store read failed, using fallback config");
                fallback
            }
        }
    }

    fn spawn_record(
        &self,
        id: &SessionId,
        config: SpawnConfig,
    ) -> Result<Arc<SessionRecord>, SessionError> {
        let command_line = config.command_line();
        let cwd = resolve_workdir(config.cwd.as_deref());
        let cols = if config.cols == 0 { 80 } else { config.cols };
        let rows = if config.rows == 0 { 24 } else { config.rows };

        let (process, reader) = PtyProcess::spawn(
            config.shell.as_deref(),
            command_line.as_deref(),
            &cwd,
            cols,
            rows,
        )?;

        let record = Arc::new(SessionRecord::new(id.clone(), config, process));
        self.start_read_loop(Arc::clone(&record), reader);
        Ok(record)
    }

    /// Drains process output into the record until EOF, then resolves the
    /// exit code, marks the record exited, and reflects the status to the
    /// store. One logical stream per session keeps emission order.
    fn start_read_loop(&self, record: Arc<SessionRecord>, reader: Box<dyn Read + Send>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let reader = Arc::new(std::sync::Mutex::new(reader));
            loop {
                let reader_clone = Arc::clone(&reader);
                let result = tokio::task::spawn_blocking(move || {
                    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                    let mut reader = reader_clone.lock().expect("reader lock");
                    match reader.read(&mut buffer) {
                        Ok(0) => Ok(None),
                        Ok(n) => {
                            buffer.truncate(n);
                            Ok(Some(buffer))
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

                match result {
                    Ok(Ok(Some(data))) => record.append_output(Bytes::from(data)).await,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        if record.is_alive() {
                            tracing::error!(session_id = %record.id(), error = %e, "PTY read error");
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::error!(session_id = %record.id(), error = %e, "PTY read task panicked");
                        break;
                    }
                }
            }

            let exit_code = record.process().collect_exit_code().await;
            record.mark_exited(exit_code).await;
            if let Err(e) = store.set_status(record.id(), SessionStatus::Stopped).await {
                tracing::warn!(session_id = %record.id(), error = %e, "Failed to record stopped status");
            }
        });
    }
}

/// Validates a requested working directory, falling back to the home
/// directory rather than failing the spawn.
fn resolve_workdir(requested: Option<&Path>) -> PathBuf {
    if let Some(dir) = requested {
        if dir.is_dir() {
            return dir.to_path_buf();
        }
        tracing::warn!(
            requested = %dir.display(),
            "Working directory missing or not a directory, falling back to home"
        );
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}
