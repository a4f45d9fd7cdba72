//! Binary split tree of terminal panes.
//!
//! A [`SplitNode::Split`] owns exactly two children in a fixed-size array,
//! so a split with a missing child cannot be constructed. Removing one of
//! its children replaces the split by the surviving sibling.
//!
//! Traversals use an explicit stack, so arbitrarily deep trees never
//! exhaust the call stack.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// How a split divides its space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Children side by side.
    Horizontal,
    /// Children stacked.
    Vertical,
}

/// A node of the layout tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitNode {
    /// A pane showing one terminal session.
    Leaf { terminal_id: SessionId },
    /// A division of space between exactly two children.
    Split {
        direction: SplitDirection,
        children: Box<[SplitNode; 2]>,
    },
}

/// Result of removing a leaf from a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The leaf was removed and its parent split collapsed.
    Removed,
    /// The leaf is the whole tree; nothing was changed.
    SoleLeaf,
    /// No leaf with that id exists.
    NotFound,
}

/// Structural defects detected by [`SplitNode::check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("terminal {0} appears in more than one leaf")]
    DuplicateTerminal(SessionId),
}

impl SplitNode {
    /// Creates a leaf.
    pub fn leaf(terminal_id: impl Into<SessionId>) -> Self {
        SplitNode::Leaf {
            terminal_id: terminal_id.into(),
        }
    }

    /// Creates a split of two subtrees.
    pub fn split(direction: SplitDirection, first: SplitNode, second: SplitNode) -> Self {
        SplitNode::Split {
            direction,
            children: Box::new([first, second]),
        }
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, SplitNode::Leaf { .. })
    }

    fn is_leaf_for(&self, target: &str) -> bool {
        matches!(self, SplitNode::Leaf { terminal_id } if terminal_id == target)
    }

    /// Terminal ids of all leaves, left to right.
    pub fn terminal_ids(&self) -> Vec<SessionId> {
        let mut ids = Vec::new();
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            match node {
                SplitNode::Leaf { terminal_id } => ids.push(terminal_id.clone()),
                SplitNode::Split { children, .. } => {
                    stack.push(&children[1]);
                    stack.push(&children[0]);
                }
            }
        }

        ids
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            match node {
                SplitNode::Leaf { .. } => count += 1,
                SplitNode::Split { children, .. } => stack.extend(children.iter()),
            }
        }

        count
    }

    /// Number of splits on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            match node {
                SplitNode::Leaf { .. } => max = max.max(depth),
                SplitNode::Split { children, .. } => {
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
            }
        }

        max
    }

    /// Number of splits above the leaf for `target`, if present.
    pub fn depth_of(&self, target: &str) -> Option<usize> {
        let mut stack = vec![(self, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            match node {
                SplitNode::Leaf { terminal_id } if terminal_id == target => return Some(depth),
                SplitNode::Leaf { .. } => {}
                SplitNode::Split { children, .. } => {
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
            }
        }

        None
    }

    /// Whether a leaf for `target` exists.
    pub fn contains(&self, target: &str) -> bool {
        self.depth_of(target).is_some()
    }

    /// Replaces the leaf for `target` with a split of that leaf and a new
    /// leaf for `new_id`. Returns false if `target` is not in the tree.
    pub fn split_leaf(
        &mut self,
        target: &str,
        direction: SplitDirection,
        new_id: impl Into<SessionId>,
    ) -> bool {
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            if node.is_leaf_for(target) {
                let old = std::mem::replace(node, SplitNode::leaf(SessionId::new()));
                *node = SplitNode::split(direction, old, SplitNode::leaf(new_id));
                return true;
            }

            if let SplitNode::Split { children, .. } = node {
                let [first, second] = &mut **children;
                stack.push(second);
                stack.push(first);
            }
        }

        false
    }

    /// Removes the leaf for `target`, collapsing its parent split into the
    /// surviving sibling.
    ///
    /// A tree that consists of only the target leaf is left untouched and
    /// reported as [`RemoveOutcome::SoleLeaf`]; the caller decides what
    /// replaces it.
    pub fn remove_leaf(&mut self, target: &str) -> RemoveOutcome {
        if self.is_leaf() {
            return if self.is_leaf_for(target) {
                RemoveOutcome::SoleLeaf
            } else {
                RemoveOutcome::NotFound
            };
        }

        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            let hit = match &*node {
                SplitNode::Split { children, .. } => {
                    children.iter().position(|child| child.is_leaf_for(target))
                }
                SplitNode::Leaf { .. } => continue,
            };

            if let Some(index) = hit {
                let taken = std::mem::replace(node, SplitNode::leaf(SessionId::new()));
                if let SplitNode::Split { children, .. } = taken {
                    let [first, second] = *children;
                    *node = if index == 0 { second } else { first };
                }
                return RemoveOutcome::Removed;
            }

            if let SplitNode::Split { children, .. } = node {
                let [first, second] = &mut **children;
                stack.push(second);
                stack.push(first);
            }
        }

        RemoveOutcome::NotFound
    }

    /// Validates that no terminal id appears in more than one leaf.
    pub fn check(&self) -> Result<(), TreeError> {
        let mut seen = HashSet::new();
        for id in self.terminal_ids() {
            if !seen.insert(id.clone()) {
                return Err(TreeError::DuplicateTerminal(id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use SplitDirection::{Horizontal, Vertical};

    fn leaf(id: &str) -> SplitNode {
        SplitNode::leaf(id)
    }

    /// Split(v, [Split(h, [t1, t2]), t3])
    fn sample() -> SplitNode {
        SplitNode::split(
            Vertical,
            SplitNode::split(Horizontal, leaf("t1"), leaf("t2")),
            leaf("t3"),
        )
    }

    #[test]
    fn test_leaf_basics() {
        let node = leaf("t1");
        assert!(node.is_leaf());
        assert_eq!(node.terminal_ids(), vec!["t1"]);
        assert_eq!(node.leaf_count(), 1);
        assert_eq!(node.depth(), 0);
        assert_eq!(node.depth_of("t1"), Some(0));
        assert!(!node.contains("t2"));
    }

    #[test]
    fn test_terminal_ids_left_to_right() {
        let tree = sample();
        assert_eq!(tree.terminal_ids(), vec!["t1", "t2", "t3"]);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.depth_of("t2"), Some(2));
        assert_eq!(tree.depth_of("t3"), Some(1));
        assert_eq!(tree.depth_of("t9"), None);
    }

    #[test]
    fn test_split_root_leaf() {
        let mut tree = leaf("t1");
        assert!(tree.split_leaf("t1", Vertical, "t2"));
        assert_eq!(tree, SplitNode::split(Vertical, leaf("t1"), leaf("t2")));
    }

    #[test]
    fn test_split_nested_leaf() {
        let mut tree = sample();
        assert!(tree.split_leaf("t2", Vertical, "t4"));

        let expected = SplitNode::split(
            Vertical,
            SplitNode::split(
                Horizontal,
                leaf("t1"),
                SplitNode::split(Vertical, leaf("t2"), leaf("t4")),
            ),
            leaf("t3"),
        );
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_split_missing_leaf_is_noop() {
        let mut tree = sample();
        assert!(!tree.split_leaf("t9", Vertical, "t4"));
        assert_eq!(tree, sample());
    }

    #[test]
    fn test_remove_collapses_parent() {
        let mut tree = SplitNode::split(Vertical, leaf("t1"), leaf("t2"));
        assert_eq!(tree.remove_leaf("t1"), RemoveOutcome::Removed);
        assert_eq!(tree, leaf("t2"));
    }

    #[test]
    fn test_remove_nested_keeps_sibling_subtree() {
        let mut tree = sample();
        assert_eq!(tree.remove_leaf("t3"), RemoveOutcome::Removed);
        assert_eq!(tree, SplitNode::split(Horizontal, leaf("t1"), leaf("t2")));

        let mut tree = sample();
        assert_eq!(tree.remove_leaf("t2"), RemoveOutcome::Removed);
        assert_eq!(tree, SplitNode::split(Vertical, leaf("t1"), leaf("t3")));
    }

    #[test]
    fn test_remove_sole_leaf_untouched() {
        let mut tree = leaf("t1");
        assert_eq!(tree.remove_leaf("t1"), RemoveOutcome::SoleLeaf);
        assert_eq!(tree, leaf("t1"));
    }

    #[test]
    fn test_remove_missing_leaf() {
        let mut tree = sample();
        assert_eq!(tree.remove_leaf("t9"), RemoveOutcome::NotFound);
        assert_eq!(tree, sample());

        let mut tree = leaf("t1");
        assert_eq!(tree.remove_leaf("t9"), RemoveOutcome::NotFound);
    }

    #[test]
    fn test_check_detects_duplicates() {
        assert!(sample().check().is_ok());

        let tree = SplitNode::split(Vertical, leaf("t1"), leaf("t1"));
        assert_eq!(
            tree.check(),
            Err(TreeError::DuplicateTerminal("t1".to_string()))
        );
    }

    #[test]
    fn test_deep_tree_traversal() {
        let mut tree = leaf("t0");
        for i in 1..=5_000 {
            let target = format!("t{}", i - 1);
            assert!(tree.split_leaf(&target, Horizontal, format!("t{}", i)));
        }

        assert_eq!(tree.leaf_count(), 5_001);
        assert_eq!(tree.depth(), 5_000);
        assert_eq!(tree.depth_of("t5000"), Some(5_000));
        assert_eq!(tree.remove_leaf("t5000"), RemoveOutcome::Removed);
        assert_eq!(tree.leaf_count(), 5_000);

        // Dismantle iteratively instead of relying on recursive drop.
        let mut stack = vec![tree];
        while let Some(node) = stack.pop() {
            if let SplitNode::Split { children, .. } = node {
                let [first, second] = *children;
                stack.push(first);
                stack.push(second);
            }
        }
    }

    #[test]
    fn test_serde_shape() {
        let tree = SplitNode::split(Vertical, leaf("t1"), leaf("t2"));
        let json = serde_json::to_value(&tree).unwrap();

        assert_eq!(json["type"], "split");
        assert_eq!(json["direction"], "vertical");
        assert_eq!(json["children"][0]["type"], "leaf");
        assert_eq!(json["children"][1]["terminal_id"], "t2");

        let back: SplitNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
