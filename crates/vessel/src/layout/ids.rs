//! Id generation for sessions and workspaces.

use uuid::Uuid;

use super::workspace::WorkspaceId;
use crate::session::SessionId;

#[derive(Debug)]
enum Scheme {
    Random,
    Sequential { next_session: u64, next_workspace: u64 },
}

/// The single source of session and workspace ids.
///
/// Ids are never handed out twice: sequential counters only move forward and
/// random ids are UUID v4. No history of issued ids is kept.
#[derive(Debug)]
pub struct IdGenerator {
    scheme: Scheme,
}

impl IdGenerator {
    /// Random UUID v4 ids.
    pub fn new() -> Self {
        Self {
            scheme: Scheme::Random,
        }
    }

    /// Predictable ids: `t1`, `t2`, ... for sessions and `w1`, `w2`, ...
    /// for workspaces.
    pub fn sequential() -> Self {
        Self {
            scheme: Scheme::Sequential {
                next_session: 1,
                next_workspace: 1,
            },
        }
    }

    /// Mints a fresh session id.
    pub fn next_session_id(&mut self) -> SessionId {
        match &mut self.scheme {
            Scheme::Random => Uuid::new_v4().to_string(),
            Scheme::Sequential { next_session, .. } => {
                let id = format!("t{}", next_session);
                *next_session += 1;
                id
            }
        }
    }

    /// Mints a fresh workspace id.
    pub fn next_workspace_id(&mut self) -> WorkspaceId {
        match &mut self.scheme {
            Scheme::Random => Uuid::new_v4().to_string(),
            Scheme::Sequential { next_workspace, .. } => {
                let id = format!("w{}", next_workspace);
                *next_workspace += 1;
                id
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
