//! # Vessel Bridge Protocol
//!
//! Message contract between a UI-side caller and the Vessel session manager.
//!
//! ## Overview
//!
//! One logical channel carries traffic for every terminal session. Each
//! message names the session it concerns:
//!
//! - **Requests** (`Create`) wait for a `Created` or `Error` response that
//!   echoes the request's sequence number.
//! - **Fire-and-forget** messages (`Write`, `Resize`, `Destroy`) are never
//!   acknowledged, so a keystroke costs no round trip.
//! - **Push** messages (`Data`, `Exit`) arrive unsolicited; consumers filter
//!   them by session id.
//!
//! For a given session, the `Created` response always precedes any `Data`
//! or `Exit` for it.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             Bridge Messages             │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │                Framing                  │  Length-prefixed, LZ4
//! ├─────────────────────────────────────────┤
//! │    Transport (Unix socket / in-memory)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, FrameCodec, Message};
//! use protocol::messages::Create;
//!
//! let message = Message::Create(Create {
//!     session_id: "b1946ac9".to_string(),
//!     cols: 80,
//!     rows: 24,
//!     cwd: None,
//! });
//! let envelope = Envelope::new(1, message);
//!
//! let codec = FrameCodec::new();
//! let bytes = codec.encode_envelope(&envelope).unwrap();
//! let (frame, _) = codec.decode(&bytes).unwrap();
//! assert_eq!(Envelope::from_msgpack(&frame.payload).unwrap(), envelope);
//! ```

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    Frame, FrameCodec, FrameFlags, FrameReader, FrameWriter, COMPRESSION_THRESHOLD,
    FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_FRAME_SIZE,
};
pub use messages::{Envelope, ErrorCode, Message, MessagePattern, PROTOCOL_VERSION};
