//! Bridge between a UI-side caller and the session manager.
//!
//! The bridge carries the [`protocol`] messages over one byte stream per
//! caller. The [`BridgeServer`] side owns real sessions; the
//! [`BridgeClient`] side implements [`SessionManager`](crate::session::SessionManager),
//! so the layout engine runs unchanged on either end of the wire.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/vessel/bridge.sock`
//! - Fallback: `/tmp/vessel-$UID/bridge.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use vessel::bridge::{get_socket_path, BridgeListener};
//! use vessel::config::SessionConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = BridgeListener::bind(&get_socket_path(), SessionConfig::default()).await?;
//!     listener.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::BridgeClient;
#[cfg(unix)]
pub use server::BridgeListener;
pub use server::BridgeServer;

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by bridge endpoints.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket setup or accept failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something that could not be decoded, or the stream broke.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

/// Get the socket path for the bridge listener.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/vessel/bridge.sock`
/// 2. Otherwise: `/tmp/vessel-$UID/bridge.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("vessel").join("bridge.sock")
        }
        _ => {
            // Get UID by checking metadata of a file we own
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/vessel-{}", uid)).join("bridge.sock")
        }
    }
}

/// Non-Unix platforms have no Unix domain sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    std::env::temp_dir().join("vessel").join("bridge.sock")
}

/// Inline notice written into a pane when its process exits.
pub fn exit_notice(exit_code: i32) -> String {
    format!(
        "\r\n\x1b[90m[Process exited with code {}]\x1b[0m\r\n",
        exit_code
    )
}
