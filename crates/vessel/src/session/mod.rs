//! Session management module.
//!
//! This module provides PTY spawning and session lifecycle management.
//! Sessions are created under a caller-chosen id, receive input and resize
//! commands, stream their output to an [`EventSink`], and report their exit
//! exactly once.

pub mod manager;
pub mod pty;
pub mod sink;

use thiserror::Error;

pub use manager::{SessionInfo, SessionManager, SessionManagerImpl, SESSION_ID_ENV};
pub use pty::{Session, SpawnOptions};
pub use sink::{EventSink, SessionEvent, SinkStats, DEFAULT_SINK_CAPACITY};

/// Unique identifier for a session. Opaque to the session manager.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A live session already uses this id.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Failed to spawn the PTY or the shell process.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// The configured session limit has been reached.
    #[error("session limit reached ({0} sessions)")]
    LimitReached(usize),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the session.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bridge to a remote session manager failed.
    #[error("bridge error: {0}")]
    Bridge(String),
}

impl From<protocol::ProtocolError> for SessionError {
    fn from(err: protocol::ProtocolError) -> Self {
        SessionError::Bridge(err.to_string())
    }
}
