//! Workspaces: a named split tree plus the registry of its terminals.

use std::collections::HashSet;

use serde::Serialize;

use super::tree::{RemoveOutcome, SplitDirection, SplitNode};
use crate::session::SessionId;

/// Unique identifier for a workspace.
pub type WorkspaceId = String;

/// A named collection of terminal panes arranged in one split tree.
///
/// `terminal_ids` always holds exactly the terminals reachable from `root`,
/// without duplicates, and `root` always holds at least one leaf. Every
/// mutation re-checks both and panics if an edit broke them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    id: WorkspaceId,
    name: String,
    root: SplitNode,
    terminal_ids: Vec<SessionId>,
    cwd: Option<String>,
}

impl Workspace {
    pub(crate) fn new(
        id: WorkspaceId,
        name: impl Into<String>,
        terminal_id: SessionId,
        cwd: Option<String>,
    ) -> Self {
        let workspace = Self {
            id,
            name: name.into(),
            root: SplitNode::leaf(terminal_id.clone()),
            terminal_ids: vec![terminal_id],
            cwd,
        };
        workspace.assert_consistent();
        workspace
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &SplitNode {
        &self.root
    }

    /// Terminals of this workspace, in the order they were added.
    pub fn terminal_ids(&self) -> &[SessionId] {
        &self.terminal_ids
    }

    /// Working directory new panes start in.
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn contains(&self, terminal_id: &str) -> bool {
        self.terminal_ids.iter().any(|id| id == terminal_id)
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Splits the pane for `target`, adding a pane for `new_id`.
    pub(crate) fn split(
        &mut self,
        target: &str,
        direction: SplitDirection,
        new_id: SessionId,
    ) -> bool {
        if !self.root.split_leaf(target, direction, new_id.clone()) {
            return false;
        }
        self.terminal_ids.push(new_id);
        self.assert_consistent();
        true
    }

    /// Removes the pane for `target`. The last pane is never removed here;
    /// see [`Workspace::reseed`].
    pub(crate) fn remove(&mut self, target: &str) -> RemoveOutcome {
        let outcome = self.root.remove_leaf(target);
        if outcome == RemoveOutcome::Removed {
            self.terminal_ids.retain(|id| id != target);
            self.assert_consistent();
        }
        outcome
    }

    /// Replaces the whole tree with a single pane for `terminal_id`.
    pub(crate) fn reseed(&mut self, terminal_id: SessionId) {
        self.root = SplitNode::leaf(terminal_id.clone());
        self.terminal_ids = vec![terminal_id];
        self.assert_consistent();
    }

    /// Panics if the tree and the terminal registry disagree.
    pub fn assert_consistent(&self) {
        if let Err(e) = self.root.check() {
            panic!("workspace {}: malformed split tree: {}", self.id, e);
        }

        let in_tree: HashSet<&str> = self.root_ids().collect();
        let registered: HashSet<&str> = self.terminal_ids.iter().map(String::as_str).collect();

        assert_eq!(
            registered.len(),
            self.terminal_ids.len(),
            "workspace {}: duplicate terminal ids {:?}",
            self.id,
            self.terminal_ids
        );
        assert!(
            !in_tree.is_empty(),
            "workspace {}: split tree has no leaves",
            self.id
        );
        assert_eq!(
            in_tree, registered,
            "workspace {}: terminal registry out of sync with split tree",
            self.id
        );
    }

    fn root_ids(&self) -> impl Iterator<Item = &str> {
        let mut stack = vec![&self.root];
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                match node {
                    SplitNode::Leaf { terminal_id } => return Some(terminal_id.as_str()),
                    SplitNode::Split { children, .. } => stack.extend(children.iter()),
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::new("w1".to_string(), "A", "t1".to_string(), None)
    }

    #[test]
    fn test_new_workspace_has_one_pane() {
        let ws = workspace();
        assert_eq!(ws.id(), "w1");
        assert_eq!(ws.name(), "A");
        assert_eq!(ws.root(), &SplitNode::leaf("t1"));
        assert_eq!(ws.terminal_ids(), ["t1"]);
        assert_eq!(ws.leaf_count(), 1);
        assert!(ws.cwd().is_none());
    }

    #[test]
    fn test_split_and_remove_keep_registry_in_sync() {
        let mut ws = workspace();

        assert!(ws.split("t1", SplitDirection::Vertical, "t2".to_string()));
        assert_eq!(ws.terminal_ids(), ["t1", "t2"]);
        assert!(ws.contains("t2"));

        assert_eq!(ws.remove("t1"), RemoveOutcome::Removed);
        assert_eq!(ws.terminal_ids(), ["t2"]);
        assert_eq!(ws.root(), &SplitNode::leaf("t2"));
    }

    #[test]
    fn test_split_unknown_target() {
        let mut ws = workspace();
        assert!(!ws.split("t9", SplitDirection::Vertical, "t2".to_string()));
        assert_eq!(ws.terminal_ids(), ["t1"]);
    }

    #[test]
    fn test_remove_sole_leaf_keeps_pane() {
        let mut ws = workspace();
        assert_eq!(ws.remove("t1"), RemoveOutcome::SoleLeaf);
        assert_eq!(ws.terminal_ids(), ["t1"]);

        ws.reseed("t3".to_string());
        assert_eq!(ws.root(), &SplitNode::leaf("t3"));
        assert_eq!(ws.terminal_ids(), ["t3"]);
    }

    #[test]
    fn test_rename() {
        let mut ws = workspace();
        ws.set_name("Backend");
        assert_eq!(ws.name(), "Backend");
    }

    #[test]
    #[should_panic(expected = "out of sync")]
    fn test_desynced_registry_is_fatal() {
        let mut ws = workspace();
        ws.terminal_ids.push("ghost".to_string());
        ws.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "malformed split tree")]
    fn test_duplicate_leaf_is_fatal() {
        let mut ws = workspace();
        ws.root = SplitNode::split(
            SplitDirection::Horizontal,
            SplitNode::leaf("t1"),
            SplitNode::leaf("t1"),
        );
        ws.assert_consistent();
    }

    #[test]
    fn test_serializes_for_ui_snapshot() {
        let mut ws = workspace();
        ws.split("t1", SplitDirection::Horizontal, "t2".to_string());

        let json = serde_json::to_value(&ws).unwrap();
        assert_eq!(json["name"], "A");
        assert_eq!(json["root"]["type"], "split");
        assert_eq!(json["terminal_ids"][1], "t2");
    }
}
