//! Node trees and artifact invalidation
//!
//! Every root owns a tree of nodes. Compiled code for a root, and every OSR
//! artifact of a unit placed anywhere in that tree, bakes in assumptions
//! about the tree's shape. Replacing any node below the root therefore
//! invalidates the root's artifacts and all OSR artifacts registered under
//! it. Invalidated artifacts stay in their maps and the owning metadata is
//! not disabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::info;

use super::artifact::CompiledArtifact;
use super::metadata::OsrMetadata;

/// Identity of a node in a root's tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// A node that belongs to no tree
    pub fn detached() -> Self {
        NodeId(0)
    }
}

struct NodeRecord {
    label: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Default)]
struct RootDependents {
    artifacts: Vec<Weak<CompiledArtifact>>,
    metadata: Vec<Weak<OsrMetadata>>,
}

/// Result of a node replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReplacement {
    /// The node now in the old node's place
    pub node: NodeId,
    /// Root whose code was invalidated
    pub root: NodeId,
    /// Root artifacts invalidated
    pub root_artifacts: usize,
    /// OSR artifacts invalidated
    pub osr_artifacts: usize,
}

/// Tracks node trees and the compiled code depending on them
#[derive(Default)]
pub struct InvalidationTracker {
    nodes: RwLock<FxHashMap<NodeId, NodeRecord>>,
    dependents: Mutex<FxHashMap<NodeId, RootDependents>>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root of a new tree
    pub fn new_root(&self, label: &str) -> NodeId {
        let id = NodeId::next();
        self.nodes.write().insert(
            id,
            NodeRecord { label: label.to_string(), parent: None, children: Vec::new() },
        );
        id
    }

    /// Add a child node; `None` if the parent is unknown
    pub fn adopt(&self, parent: NodeId, label: &str) -> Option<NodeId> {
        let mut nodes = self.nodes.write();
        let id = NodeId::next();
        nodes.get_mut(&parent)?.children.push(id);
        nodes.insert(
            id,
            NodeRecord { label: label.to_string(), parent: Some(parent), children: Vec::new() },
        );
        Some(id)
    }

    pub fn label(&self, node: NodeId) -> Option<String> {
        self.nodes.read().get(&node).map(|n| n.label.clone())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.read().get(&node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes.read().get(&node).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Root of the tree containing `node`
    pub fn root_of(&self, node: NodeId) -> Option<NodeId> {
        let nodes = self.nodes.read();
        let mut current = node;
        loop {
            match nodes.get(&current)?.parent {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
    }

    /// Register compiled code of a root
    pub fn register_root_artifact(&self, root: NodeId, artifact: &Arc<CompiledArtifact>) {
        self.dependents
            .lock()
            .entry(root)
            .or_default()
            .artifacts
            .push(Arc::downgrade(artifact));
    }

    /// Register a unit's metadata under the root of its node
    ///
    /// Returns false if the node belongs to no tree.
    pub fn register_metadata(&self, metadata: &Arc<OsrMetadata>) -> bool {
        let Some(root) = self.root_of(metadata.node()) else {
            return false;
        };
        self.dependents
            .lock()
            .entry(root)
            .or_default()
            .metadata
            .push(Arc::downgrade(metadata));
        true
    }

    /// Replace a non-root node with a fresh node in the same position
    ///
    /// The old node and its subtree leave the tree. Returns `None` for
    /// unknown nodes and for roots.
    pub fn replace(&self, node: NodeId, label: &str) -> Option<NodeReplacement> {
        let replacement = {
            let mut nodes = self.nodes.write();
            let parent = nodes.get(&node)?.parent?;
            let replacement = NodeId::next();
            let siblings = &mut nodes.get_mut(&parent)?.children;
            let index = siblings.iter().position(|&c| c == node)?;
            siblings[index] = replacement;
            nodes.insert(
                replacement,
                NodeRecord { label: label.to_string(), parent: Some(parent), children: Vec::new() },
            );
            remove_subtree(&mut nodes, node);
            replacement
        };
        let root = self.root_of(replacement)?;
        let (root_artifacts, osr_artifacts) = self.invalidate_root(root);
        info!(
            root = ?root,
            root_artifacts,
            osr_artifacts,
            "node replaced, invalidating dependent code"
        );
        Some(NodeReplacement { node: replacement, root, root_artifacts, osr_artifacts })
    }

    /// Invalidate everything compiled against a root
    ///
    /// Returns the number of root and OSR artifacts that were valid.
    pub fn invalidate_root(&self, root: NodeId) -> (usize, usize) {
        let mut dependents = self.dependents.lock();
        let Some(deps) = dependents.get_mut(&root) else {
            return (0, 0);
        };
        deps.artifacts.retain(|w| w.strong_count() > 0);
        deps.metadata.retain(|w| w.strong_count() > 0);
        let root_artifacts = deps
            .artifacts
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|a| a.invalidate())
            .count();
        let osr_artifacts = deps
            .metadata
            .iter()
            .filter_map(Weak::upgrade)
            .map(|m| m.invalidate_all())
            .sum();
        (root_artifacts, osr_artifacts)
    }
}

fn remove_subtree(nodes: &mut FxHashMap<NodeId, NodeRecord>, node: NodeId) {
    if let Some(record) = nodes.remove(&node) {
        for child in record.children {
            remove_subtree(nodes, child);
        }
    }
}
