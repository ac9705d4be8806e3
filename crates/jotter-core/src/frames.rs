//! Execution frames.
//!
//! Frames form a parent-linked list stored in an arena. Pushing creates a
//! child of an existing frame; frames are never popped or modified once a
//! child supersedes them, they are abandoned when their execution ends.

use std::collections::BTreeMap;

use serde::Serialize;

/// Index of a frame in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameId(usize);

impl FrameId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// A library activated within a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLibrary {
    /// Identity key of the canonical library reference.
    pub key: String,
    pub name: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct FrameNode {
    parent: Option<FrameId>,
    libraries: Vec<ActiveLibrary>,
}

/// Arena-backed stack of execution frames with a persistent root.
#[derive(Debug, Clone)]
pub struct FrameStack {
    nodes: Vec<FrameNode>,
}

/// Saved size of a [`FrameStack`], for rolling back an interrupted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMark {
    nodes: usize,
    root_libraries: usize,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStack {
    /// Create a stack holding only the root frame.
    pub fn new() -> Self {
        Self {
            nodes: vec![FrameNode {
                parent: None,
                libraries: Vec::new(),
            }],
        }
    }

    /// The session-lifetime root frame.
    pub fn root(&self) -> FrameId {
        FrameId(0)
    }

    /// Create a child of `parent`.
    pub fn push(&mut self, parent: FrameId) -> FrameId {
        let id = FrameId(self.nodes.len());
        self.nodes.push(FrameNode {
            parent: Some(parent),
            libraries: Vec::new(),
        });
        id
    }

    pub fn parent(&self, frame: FrameId) -> Option<FrameId> {
        self.nodes.get(frame.0).and_then(|n| n.parent)
    }

    /// Number of frames between `frame` and the root.
    pub fn depth(&self, frame: FrameId) -> usize {
        self.ancestry(frame).count().saturating_sub(1)
    }

    /// Record a library as active in `frame`.
    pub fn add_library(&mut self, frame: FrameId, library: ActiveLibrary) {
        if let Some(node) = self.nodes.get_mut(frame.0) {
            node.libraries.push(library);
        }
    }

    /// Libraries activated directly in `frame`.
    pub fn libraries(&self, frame: FrameId) -> &[ActiveLibrary] {
        self.nodes
            .get(frame.0)
            .map(|n| n.libraries.as_slice())
            .unwrap_or_default()
    }

    /// Whether a library with this key is active in `frame` or an ancestor.
    pub fn is_active(&self, frame: FrameId, key: &str) -> bool {
        self.ancestry(frame)
            .any(|id| self.nodes[id.0].libraries.iter().any(|l| l.key == key))
    }

    /// Options of every library visible from `frame`, merged.
    ///
    /// Frames are merged from `frame` towards the root, so when a key is
    /// set in several frames the value from the frame closest to the root
    /// wins. Within one frame, later libraries override earlier ones.
    pub fn library_options(&self, frame: FrameId) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        for id in self.ancestry(frame) {
            for library in &self.nodes[id.0].libraries {
                options.extend(library.options.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        options
    }

    /// Iterate from `frame` up to the root.
    fn ancestry(&self, frame: FrameId) -> impl Iterator<Item = FrameId> + '_ {
        let start = (frame.0 < self.nodes.len()).then_some(frame);
        std::iter::successors(start, move |id| self.nodes[id.0].parent)
    }

    /// Number of frames in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current size of the stack.
    pub fn mark(&self) -> FrameMark {
        FrameMark {
            nodes: self.nodes.len(),
            root_libraries: self.nodes[0].libraries.len(),
        }
    }

    /// Abandon frames created after `mark`.
    ///
    /// Root libraries are kept; they outlive the execution that added them.
    pub fn release(&mut self, mark: FrameMark) {
        self.nodes.truncate(mark.nodes.max(1));
    }

    /// Restore the stack to `mark`, including root libraries.
    pub fn rollback(&mut self, mark: FrameMark) {
        self.release(mark);
        self.nodes[0].libraries.truncate(mark.root_libraries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(key: &str, options: &[(&str, &str)]) -> ActiveLibrary {
        ActiveLibrary {
            key: key.to_string(),
            name: key.to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_push_links_parent() {
        let mut stack = FrameStack::new();
        let root = stack.root();
        let child = stack.push(root);
        let grandchild = stack.push(child);

        assert_eq!(stack.parent(grandchild), Some(child));
        assert_eq!(stack.parent(root), None);
        assert_eq!(stack.depth(grandchild), 2);
    }

    #[test]
    fn test_root_most_option_wins() {
        let mut stack = FrameStack::new();
        let root = stack.root();
        stack.add_library(root, library("a", &[("theme", "light"), ("width", "80")]));
        let child = stack.push(root);
        stack.add_library(child, library("b", &[("theme", "dark"), ("height", "20")]));

        let options = stack.library_options(child);
        assert_eq!(options["theme"], "light");
        assert_eq!(options["width"], "80");
        assert_eq!(options["height"], "20");

        // The root does not see its child's options
        assert!(!stack.library_options(root).contains_key("height"));
    }

    #[test]
    fn test_is_active_walks_ancestors() {
        let mut stack = FrameStack::new();
        let root = stack.root();
        stack.add_library(root, library("math", &[]));
        let child = stack.push(root);
        stack.add_library(child, library("plots", &[]));

        assert!(stack.is_active(child, "math"));
        assert!(stack.is_active(child, "plots"));
        assert!(!stack.is_active(root, "plots"));
    }

    #[test]
    fn test_release_and_rollback() {
        let mut stack = FrameStack::new();
        let root = stack.root();
        stack.add_library(root, library("math", &[]));
        let mark = stack.mark();

        let child = stack.push(root);
        stack.add_library(child, library("plots", &[]));
        stack.add_library(root, library("bold", &[]));

        stack.release(mark);
        assert_eq!(stack.len(), 1);
        assert!(stack.is_active(root, "bold"));

        stack.rollback(mark);
        assert!(!stack.is_active(root, "bold"));
        assert!(stack.is_active(root, "math"));
    }
}
