//! Lineage - the parent/child forest over one snapshot

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A program's position in the lineage forest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LineageNode {
    /// Program id
    pub id: String,
    /// Parent id as stored (may point outside the snapshot)
    pub parent_id: Option<String>,
    /// Generation
    pub generation: u64,
    /// Island
    pub island_id: Option<u32>,
    /// Composite score
    pub score: f64,
    /// Ids of programs whose parent is this node, in snapshot order
    pub children: Vec<String>,
    /// Change description
    pub changes_description: String,
}

/// Lineage forest with its golden path.
///
/// ## Invariants
///
/// - `root_ids` holds exactly the nodes whose parent is absent or missing
///   from `nodes`.
/// - Every non-root node appears in exactly one parent's `children`.
/// - `best_path` runs oldest-first from a root to the best program.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LineageTree {
    /// Nodes by id
    pub nodes: BTreeMap<String, LineageNode>,
    /// Root ids, in snapshot order
    pub root_ids: Vec<String>,
    /// Ancestor chain of the best program, oldest first
    pub best_path: Vec<String>,
}

impl LineageTree {
    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
