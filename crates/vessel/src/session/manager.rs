//! Session manager for managing multiple PTY sessions.
//!
//! This module provides a thread-safe session manager that can create,
//! write to, resize and destroy PTY sessions concurrently. The registry is a
//! sharded map; its locks are only held around inserts, removals and lookups,
//! never across PTY I/O.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use super::pty::{Session, SpawnOptions};
use super::sink::{EventSink, SessionEvent};
use super::{SessionError, SessionId};
use crate::config::SessionConfig;

/// Environment variable carrying the session id into the shell.
pub const SESSION_ID_ENV: &str = "VESSEL_SESSION_ID";

/// Exit code reported when a session's waiter disappeared without a status.
const LOST_EXIT_CODE: i32 = -1;

/// Trait for session management operations.
///
/// The layout engine drives sessions through this trait, so it works the
/// same against an in-process manager and against a bridge client.
/// Unknown ids are never an error for `write`, `resize` and `destroy`.
#[allow(async_fn_in_trait)]
pub trait SessionManager: Send + Sync {
    /// Spawns a shell for `id` and returns its process id.
    ///
    /// Returns once the process is spawned; output arrives asynchronously.
    async fn create(
        &self,
        id: &str,
        cols: u16,
        rows: u16,
        cwd: Option<&str>,
    ) -> Result<u32, SessionError>;

    /// Writes input bytes to a session. No-op for unknown ids.
    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Resizes a session's terminal. No-op for unknown ids.
    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Terminates a session. Idempotent; no-op for unknown ids.
    async fn destroy(&self, id: &str) -> Result<(), SessionError>;

    /// Terminates every session without waiting for the processes to exit.
    async fn destroy_all(&self);
}

impl<T: SessionManager> SessionManager for Arc<T> {
    async fn create(
        &self,
        id: &str,
        cols: u16,
        rows: u16,
        cwd: Option<&str>,
    ) -> Result<u32, SessionError> {
        (**self).create(id, cols, rows, cwd).await
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        (**self).write(id, data).await
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        (**self).resize(id, cols, rows).await
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        (**self).destroy(id).await
    }

    async fn destroy_all(&self) {
        (**self).destroy_all().await
    }
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Process ID of the shell.
    pub pid: u32,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
    /// Working directory the shell started in.
    pub cwd: PathBuf,
    /// Whether the shell process is still running.
    pub running: bool,
}

/// Thread-safe session manager implementation using DashMap.
///
/// All sessions deliver their events to the sink given at construction.
pub struct SessionManagerImpl {
    /// Map of session ID to session.
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    /// Where output and exit events go.
    sink: EventSink,
    /// Shell, working directory and limits.
    config: SessionConfig,
}

impl SessionManagerImpl {
    /// Creates a new session manager.
    pub fn new(config: SessionConfig, sink: EventSink) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            sink,
            config,
        }
    }

    /// Returns the session configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Checks if a session is registered.
    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Gets information about a specific session.
    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        let session = self.lookup(id)?;
        Some(Self::info(&session).await)
    }

    /// Lists all registered sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(Self::info(&session).await);
        }
        infos
    }

    async fn info(session: &Session) -> SessionInfo {
        let (cols, rows) = session.size().await;
        SessionInfo {
            id: session.id().clone(),
            pid: session.pid(),
            cols,
            rows,
            cwd: session.cwd().to_path_buf(),
            running: session.is_running(),
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn spawn_options(&self, id: &str, cols: u16, rows: u16, cwd: Option<&str>) -> SpawnOptions {
        SpawnOptions {
            shell: self.config.shell(),
            cols,
            rows,
            cwd: self.config.working_dir(cwd),
            term: self.config.term.clone(),
            env: vec![(SESSION_ID_ENV.to_string(), id.to_string())],
        }
    }

    /// Reports the exit of `session` and then unregisters it.
    ///
    /// The entry is only removed if it still refers to this very session.
    fn watch_exit(&self, session: Arc<Session>, exit_rx: oneshot::Receiver<i32>) {
        let sessions = Arc::clone(&self.sessions);
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let exit_code = exit_rx.await.unwrap_or(LOST_EXIT_CODE);
            let id = session.id().clone();

            sink.deliver(SessionEvent::Exit {
                id: id.clone(),
                exit_code,
            })
            .await;

            if sessions
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &session))
                .is_some()
            {
                tracing::debug!(session_id = %id, "Removed exited session");
            }
        });
    }
}

impl SessionManager for SessionManagerImpl {
    async fn create(
        &self,
        id: &str,
        cols: u16,
        rows: u16,
        cwd: Option<&str>,
    ) -> Result<u32, SessionError> {
        if self.sessions.contains_key(id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }
        if self.sessions.len() >= self.config.max_sessions {
            return Err(SessionError::LimitReached(self.config.max_sessions));
        }

        let options = self.spawn_options(id, cols, rows, cwd);
        let (session, exit_rx) = Session::spawn(id.to_string(), options, self.sink.clone())?;
        let session = Arc::new(session);
        let pid = session.pid();

        let inserted = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
                true
            }
        };
        if !inserted {
            // Lost a race against a concurrent create for the same id.
            let _ = session.kill().await;
            return Err(SessionError::AlreadyExists(id.to_string()));
        }

        self.watch_exit(session, exit_rx);

        tracing::info!(
            session_id = %id,
            pid = pid,
            cols = cols,
            rows = rows,
            "Created new session"
        );

        Ok(pid)
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        match self.lookup(id) {
            Some(session) => session.write(data).await,
            None => {
                tracing::trace!(session_id = %id, "Write to unknown session ignored");
                Ok(())
            }
        }
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        match self.lookup(id) {
            Some(session) => session.resize(cols, rows).await,
            None => {
                tracing::trace!(session_id = %id, "Resize of unknown session ignored");
                Ok(())
            }
        }
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let Some((_, session)) = self.sessions.remove(id) else {
            tracing::trace!(session_id = %id, "Destroy of unknown session ignored");
            return Ok(());
        };

        if let Err(e) = session.kill().await {
            // The process may already be on its way out.
            tracing::debug!(session_id = %id, error = %e, "Kill failed");
        }

        tracing::info!(session_id = %id, "Session destroyed");
        Ok(())
    }

    async fn destroy_all(&self) {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let count = ids.len();
        for id in ids {
            let _ = self.destroy(&id).await;
        }

        if count > 0 {
            tracing::info!(count = count, "Destroyed all sessions");
        }
    }
}
