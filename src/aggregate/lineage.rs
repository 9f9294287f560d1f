//! Lineage forest construction and subtree restriction

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{LineageNode, LineageTree, ProgramBrief};

/// Count, for every id, how many programs name it as parent.
///
/// Parents that are not themselves in the snapshot still get a count; the
/// caller looks up only ids it holds.
#[must_use]
pub fn children_counts<'a, I>(parent_ids: I) -> HashMap<&'a str, usize>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts = HashMap::new();
    for parent in parent_ids.into_iter().flatten() {
        *counts.entry(parent).or_insert(0) += 1;
    }
    counts
}

/// Build the lineage forest for a snapshot.
///
/// Children lists and `root_ids` follow snapshot order. A node whose
/// parent is missing from the snapshot is a root. `best_path` runs from a
/// root down to `best_id` and is empty when `best_id` is absent.
#[must_use]
pub fn build(programs: &[ProgramBrief], best_id: Option<&str>) -> LineageTree {
    let present: HashSet<&str> = programs.iter().map(|p| p.id.as_str()).collect();

    let mut nodes: BTreeMap<String, LineageNode> = programs
        .iter()
        .map(|p| {
            (
                p.id.clone(),
                LineageNode {
                    id: p.id.clone(),
                    parent_id: p.parent_id.clone(),
                    generation: p.generation,
                    island_id: p.island_id,
                    score: p.score,
                    children: Vec::new(),
                    changes_description: p.changes_description.clone(),
                },
            )
        })
        .collect();

    let mut root_ids = Vec::new();
    for p in programs {
        match p.parent_id.as_deref() {
            Some(parent) if present.contains(parent) && parent != p.id => {
                if let Some(node) = nodes.get_mut(parent) {
                    node.children.push(p.id.clone());
                }
            }
            _ => root_ids.push(p.id.clone()),
        }
    }

    let best_path = best_id.map(|id| ancestor_path(&nodes, id)).unwrap_or_default();

    LineageTree {
        nodes,
        root_ids,
        best_path,
    }
}

/// Restrict a tree to the subtree reachable from `root` via children edges.
///
/// When `root` is not in the tree, the tree is returned unchanged.
#[must_use]
pub fn restrict(mut tree: LineageTree, root: &str) -> LineageTree {
    if !tree.nodes.contains_key(root) {
        return tree;
    }

    let mut reachable: HashSet<String> = HashSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        if let Some(node) = tree.nodes.get(&id) {
            stack.extend(node.children.iter().cloned());
        }
    }

    tree.nodes.retain(|id, _| reachable.contains(id));
    tree.root_ids = vec![root.to_string()];
    tree
}

/// Walk parent pointers from `id` to a root, returned oldest first.
fn ancestor_path(nodes: &BTreeMap<String, LineageNode>, id: &str) -> Vec<String> {
    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(id);
    while let Some(cur) = current {
        let Some(node) = nodes.get(cur) else { break };
        // cycles only occur in corrupt stores
        if !seen.insert(cur) {
            break;
        }
        path.push(node.id.clone());
        current = node.parent_id.as_deref();
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(id: &str, parent: Option<&str>) -> ProgramBrief {
        ProgramBrief {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            ..Default::default()
        }
    }

    fn sample() -> Vec<ProgramBrief> {
        vec![
            brief("root", None),
            brief("a", Some("root")),
            brief("b", Some("root")),
            brief("a1", Some("a")),
            brief("orphan", Some("pruned")),
        ]
    }

    #[test]
    fn test_roots_include_orphans() {
        let tree = build(&sample(), None);
        assert_eq!(tree.root_ids, vec!["root".to_string(), "orphan".to_string()]);
        assert_eq!(tree.nodes["root"].children, vec!["a".to_string(), "b".to_string()]);
        assert!(tree.best_path.is_empty());
    }

    #[test]
    fn test_best_path_oldest_first() {
        let tree = build(&sample(), Some("a1"));
        assert_eq!(tree.best_path, vec!["root", "a", "a1"]);
    }

    #[test]
    fn test_best_path_empty_for_unknown_id() {
        let tree = build(&sample(), Some("missing"));
        assert!(tree.best_path.is_empty());
    }

    #[test]
    fn test_restrict_to_subtree() {
        let tree = restrict(build(&sample(), None), "a");
        assert_eq!(tree.root_ids, vec!["a".to_string()]);
        let mut ids: Vec<&str> = tree.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "a1"]);
    }

    #[test]
    fn test_restrict_unknown_root_is_noop() {
        let full = build(&sample(), None);
        let restricted = restrict(full.clone(), "nope");
        assert_eq!(full, restricted);
    }

    #[test]
    fn test_children_counts() {
        let programs = sample();
        let counts = children_counts(programs.iter().map(|p| p.parent_id.as_deref()));
        assert_eq!(counts.get("root"), Some(&2));
        assert_eq!(counts.get("a"), Some(&1));
        assert_eq!(counts.get("b"), None);
        assert_eq!(counts.get("pruned"), Some(&1));
    }

    #[test]
    fn test_parent_cycle_does_not_hang() {
        let programs = vec![brief("x", Some("y")), brief("y", Some("x"))];
        let tree = build(&programs, Some("x"));
        assert_eq!(tree.best_path.len(), 2);
    }
}
