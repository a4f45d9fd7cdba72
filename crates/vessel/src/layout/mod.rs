//! Layout engine and workspace registry.
//!
//! Each workspace arranges its terminal panes in a binary split tree. The
//! engine keeps every tree well formed: a split always has two children, a
//! workspace always has at least one pane, and a workspace's terminal
//! registry always matches the leaves of its tree.

mod engine;
mod ids;
mod tree;
mod workspace;

use thiserror::Error;

use crate::session::SessionError;

pub use engine::{ClosedPane, LayoutEngine, LayoutOptions};
pub use ids::IdGenerator;
pub use tree::{RemoveOutcome, SplitDirection, SplitNode, TreeError};
pub use workspace::{Workspace, WorkspaceId};

/// Errors from layout edits.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The session manager could not provide a session for a new pane.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The split would nest deeper than allowed.
    #[error("split depth limit of {max} reached")]
    DepthLimit { max: usize },
}
