//! Workspace registry and structural edits.
//!
//! The engine owns every workspace, the focus pointer and the handle to the
//! session manager. Each edit that needs a new session spawns it first and
//! only then touches the tree, so a failed spawn leaves the layout as it was.

use crate::config::Config;
use crate::session::{SessionId, SessionManager};

use super::ids::IdGenerator;
use super::tree::{RemoveOutcome, SplitDirection};
use super::workspace::{Workspace, WorkspaceId};
use super::LayoutError;

/// Sizing and limits for the layout engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Deepest nesting of splits allowed in one workspace.
    pub max_split_depth: usize,
    /// Columns for newly spawned sessions, until the UI resizes them.
    pub cols: u16,
    /// Rows for newly spawned sessions, until the UI resizes them.
    pub rows: u16,
}

impl LayoutOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_split_depth: config.layout.max_split_depth,
            cols: config.session.default_cols,
            rows: config.session.default_rows,
        }
    }
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What closing a pane did to its workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosedPane {
    /// The pane was removed and its parent split collapsed.
    Removed,
    /// It was the last pane; the workspace now shows a fresh session.
    Reseeded(SessionId),
}

/// Workspace registry plus focus state, driving a session manager.
pub struct LayoutEngine<S> {
    sessions: S,
    workspaces: Vec<Workspace>,
    focused: Option<WorkspaceId>,
    ids: IdGenerator,
    options: LayoutOptions,
}

impl<S: SessionManager> LayoutEngine<S> {
    pub fn new(sessions: S, options: LayoutOptions) -> Self {
        Self::with_ids(sessions, options, IdGenerator::new())
    }

    /// Creates an engine that takes ids from `ids`.
    pub fn with_ids(sessions: S, options: LayoutOptions, ids: IdGenerator) -> Self {
        Self {
            sessions,
            workspaces: Vec::new(),
            focused: None,
            ids,
            options,
        }
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// All workspaces, in creation order.
    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|ws| ws.id() == id)
    }

    /// The workspace whose tree holds `terminal_id`.
    pub fn workspace_of(&self, terminal_id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|ws| ws.contains(terminal_id))
    }

    /// Creates a workspace with one pane in the default directory.
    pub async fn create_workspace(&mut self, name: &str) -> Result<&Workspace, LayoutError> {
        self.create_workspace_in(name, None).await
    }

    /// Creates a workspace whose panes start in `cwd`.
    pub async fn create_workspace_in(
        &mut self,
        name: &str,
        cwd: Option<String>,
    ) -> Result<&Workspace, LayoutError> {
        let terminal_id = self.spawn(cwd.as_deref()).await?;
        let workspace_id = self.ids.next_workspace_id();

        tracing::info!(
            workspace_id = %workspace_id,
            workspace_name = %name,
            terminal_id = %terminal_id,
            "Created workspace"
        );

        let index = self.workspaces.len();
        self.workspaces
            .push(Workspace::new(workspace_id, name, terminal_id, cwd));
        Ok(&self.workspaces[index])
    }

    /// Removes a workspace and destroys all of its sessions.
    ///
    /// Clears focus if the workspace was focused. Unknown ids are ignored.
    pub async fn delete_workspace(&mut self, id: &str) -> Option<Workspace> {
        let Some(index) = self.index_of(id) else {
            tracing::debug!(workspace_id = %id, "Delete of unknown workspace ignored");
            return None;
        };

        let workspace = self.workspaces.remove(index);
        if self.focused.as_deref() == Some(id) {
            self.focused = None;
        }

        for terminal_id in workspace.terminal_ids() {
            self.destroy(terminal_id).await;
        }

        tracing::info!(
            workspace_id = %id,
            sessions = workspace.terminal_ids().len(),
            "Deleted workspace"
        );
        Some(workspace)
    }

    /// Splits the pane for `terminal_id`, returning the new pane's session.
    ///
    /// Returns `Ok(None)` if the workspace or the pane does not exist.
    pub async fn split_pane(
        &mut self,
        workspace_id: &str,
        terminal_id: &str,
        direction: SplitDirection,
    ) -> Result<Option<SessionId>, LayoutError> {
        let Some(index) = self.index_of(workspace_id) else {
            tracing::debug!(workspace_id = %workspace_id, "Split in unknown workspace ignored");
            return Ok(None);
        };

        let Some(depth) = self.workspaces[index].root().depth_of(terminal_id) else {
            tracing::debug!(
                workspace_id = %workspace_id,
                terminal_id = %terminal_id,
                "Split of unknown pane ignored"
            );
            return Ok(None);
        };

        if depth >= self.options.max_split_depth {
            return Err(LayoutError::DepthLimit {
                max: self.options.max_split_depth,
            });
        }

        let cwd = self.workspaces[index].cwd().map(str::to_owned);
        let new_id = self.spawn(cwd.as_deref()).await?;

        let split = self.workspaces[index].split(terminal_id, direction, new_id.clone());
        assert!(split, "pane {} vanished during split", terminal_id);

        tracing::info!(
            workspace_id = %workspace_id,
            terminal_id = %terminal_id,
            new_terminal_id = %new_id,
            direction = ?direction,
            "Split pane"
        );

        Ok(Some(new_id))
    }

    /// Closes the pane for `terminal_id` and destroys its session.
    ///
    /// Closing the last pane re-seeds the workspace with a fresh session.
    /// Returns `Ok(None)` if the workspace or the pane does not exist.
    pub async fn close_pane(
        &mut self,
        workspace_id: &str,
        terminal_id: &str,
    ) -> Result<Option<ClosedPane>, LayoutError> {
        let Some(index) = self.index_of(workspace_id) else {
            tracing::debug!(workspace_id = %workspace_id, "Close in unknown workspace ignored");
            return Ok(None);
        };

        if !self.workspaces[index].contains(terminal_id) {
            tracing::debug!(
                workspace_id = %workspace_id,
                terminal_id = %terminal_id,
                "Close of unknown pane ignored"
            );
            return Ok(None);
        }

        if self.workspaces[index].leaf_count() == 1 {
            let cwd = self.workspaces[index].cwd().map(str::to_owned);
            let fresh = self.spawn(cwd.as_deref()).await?;
            self.destroy(terminal_id).await;
            self.workspaces[index].reseed(fresh.clone());

            tracing::info!(
                workspace_id = %workspace_id,
                terminal_id = %terminal_id,
                new_terminal_id = %fresh,
                "Closed last pane, workspace re-seeded"
            );
            return Ok(Some(ClosedPane::Reseeded(fresh)));
        }

        self.destroy(terminal_id).await;
        let outcome = self.workspaces[index].remove(terminal_id);
        assert_eq!(
            outcome,
            RemoveOutcome::Removed,
            "pane {} could not be removed",
            terminal_id
        );

        tracing::info!(
            workspace_id = %workspace_id,
            terminal_id = %terminal_id,
            "Closed pane"
        );
        Ok(Some(ClosedPane::Removed))
    }

    /// Focuses a workspace exclusively. Returns false for unknown ids.
    pub fn focus_workspace(&mut self, id: &str) -> bool {
        if self.index_of(id).is_none() {
            tracing::debug!(workspace_id = %id, "Focus of unknown workspace ignored");
            return false;
        }
        self.focused = Some(id.to_string());
        true
    }

    /// Returns to the overview of all workspaces.
    pub fn unfocus(&mut self) {
        self.focused = None;
    }

    /// The focused workspace, or `None` in overview mode.
    pub fn focused(&self) -> Option<&Workspace> {
        self.focused.as_deref().and_then(|id| self.workspace(id))
    }

    /// Renames a workspace. Returns false for unknown ids.
    pub fn rename_workspace(&mut self, id: &str, name: &str) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.workspaces[index].set_name(name);
                true
            }
            None => false,
        }
    }

    /// Drops every workspace and destroys all sessions.
    pub async fn shutdown(&mut self) {
        self.workspaces.clear();
        self.focused = None;
        self.sessions.destroy_all().await;
        tracing::info!("Layout engine shut down");
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.workspaces.iter().position(|ws| ws.id() == id)
    }

    async fn spawn(&mut self, cwd: Option<&str>) -> Result<SessionId, LayoutError> {
        let id = self.ids.next_session_id();
        self.sessions
            .create(&id, self.options.cols, self.options.rows, cwd)
            .await?;
        Ok(id)
    }

    async fn destroy(&self, terminal_id: &str) {
        if let Err(e) = self.sessions.destroy(terminal_id).await {
            tracing::warn!(terminal_id = %terminal_id, error = %e, "Failed to destroy session");
        }
    }
}
