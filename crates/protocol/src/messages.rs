//! Bridge message definitions for Vessel.
//!
//! Every message names the session it concerns, so a single channel carries
//! traffic for any number of sessions. Messages fall into four patterns:
//!
//! | message   | direction        | pattern          |
//! |-----------|------------------|------------------|
//! | `Create`  | caller → manager | request          |
//! | `Created` | manager → caller | response         |
//! | `Error`   | manager → caller | response         |
//! | `Write`   | caller → manager | fire-and-forget  |
//! | `Resize`  | caller → manager | fire-and-forget  |
//! | `Destroy` | caller → manager | fire-and-forget  |
//! | `Data`    | manager → caller | push             |
//! | `Exit`    | manager → caller | push             |
//!
//! A response envelope echoes the `sequence` of the request it answers.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all bridge messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number. Responses reuse the sequence of their request.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// How a message travels across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePattern {
    /// Caller waits for a matching response.
    Request,
    /// Answer to a request, correlated by sequence number.
    Response,
    /// Caller sends and moves on; nothing comes back.
    FireAndForget,
    /// Unsolicited event from the manager.
    Push,
}

/// Top-level message enum containing all bridge message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Request to spawn a shell for a caller-chosen session id.
    Create(Create),
    /// Successful answer to `Create`.
    Created(Created),
    /// Keystroke bytes for a session.
    Write(Write),
    /// New terminal dimensions for a session.
    Resize(Resize),
    /// Terminate a session.
    Destroy(Destroy),
    /// Output produced by a session's process.
    Data(Data),
    /// A session's process exited.
    Exit(Exit),
    /// Failed answer to a request.
    Error(ErrorMessage),
}

impl Message {
    /// Returns the traffic pattern of this message.
    pub fn pattern(&self) -> MessagePattern {
        match self {
            Message::Create(_) => MessagePattern::Request,
            Message::Created(_) | Message::Error(_) => MessagePattern::Response,
            Message::Write(_) | Message::Resize(_) | Message::Destroy(_) => {
                MessagePattern::FireAndForget
            }
            Message::Data(_) | Message::Exit(_) => MessagePattern::Push,
        }
    }

    /// Returns the session this message concerns, if any.
    ///
    /// Consumers route push events to the right pane with this key.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::Create(m) => Some(&m.session_id),
            Message::Created(m) => Some(&m.session_id),
            Message::Write(m) => Some(&m.session_id),
            Message::Resize(m) => Some(&m.session_id),
            Message::Destroy(m) => Some(&m.session_id),
            Message::Data(m) => Some(&m.session_id),
            Message::Exit(m) => Some(&m.session_id),
            Message::Error(m) => m.context.as_deref(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Create(_) => "create",
            Message::Created(_) => "created",
            Message::Write(_) => "write",
            Message::Resize(_) => "resize",
            Message::Destroy(_) => "destroy",
            Message::Data(_) => "data",
            Message::Exit(_) => "exit",
            Message::Error(_) => "error",
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Request to spawn a new shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Create {
    /// Caller-chosen, globally unique session id.
    pub session_id: String,
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
    /// Working directory (default: manager's configured default).
    pub cwd: Option<String>,
}

/// Keystroke bytes for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    /// Target session.
    pub session_id: String,
    /// Raw input bytes.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Terminal resize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    /// Target session.
    pub session_id: String,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

/// Request to terminate a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destroy {
    /// Target session.
    pub session_id: String,
}

// ============================================================================
// Responses
// ============================================================================

/// Successful answer to `Create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    /// The session that was spawned.
    pub session_id: String,
    /// OS process id of the shell.
    pub pid: u32,
}

/// Failure answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Session id the error relates to, if any.
    pub context: Option<String>,
}

/// Error codes for failed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The OS refused to create the process or pseudo-terminal.
    SpawnFailed,
    /// A live session already uses the requested id.
    AlreadyExists,
    /// The manager is at its configured session limit.
    LimitReached,
    /// The message is not valid in this direction or state.
    InvalidRequest,
    /// Anything else.
    Internal,
}

// ============================================================================
// Push events
// ============================================================================

/// Output produced by a session's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// Source session.
    pub session_id: String,
    /// Raw output bytes, in the order the process produced them.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// A session's process exited. Sent exactly once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    /// Source session.
    pub session_id: String,
    /// Process exit code.
    pub exit_code: i32,
}
