//! Immutable snapshot of the remote hierarchy and path resolution.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{MegaError, Result};
use crate::fs::node::{Node, NodeType};

/// One consistent view of the remote tree.
///
/// A snapshot is never mutated once it is published through
/// [`SharedTree`](crate::fs::SharedTree); patches are applied to a clone that
/// then replaces the published pointer.
#[derive(Debug, Clone, Default)]
pub struct NodeTree {
    root: Option<String>,
    nodes: HashMap<String, Node>,
    /// parent handle -> (child name -> child handle)
    children: HashMap<String, BTreeMap<String, String>>,
}

impl NodeTree {
    /// A tree with no nodes, used while logged out or before the first fetch.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build and validate a snapshot from a flat node listing.
    ///
    /// The listing must contain exactly one root, every other node must
    /// reference a container already in the listing, names must be unique
    /// within a folder, and every node must be reachable from the root.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let mut by_handle: HashMap<String, Node> = HashMap::with_capacity(nodes.len());
        let mut root = None;

        for node in nodes {
            if node.node_type == NodeType::Root {
                if node.parent_handle.is_some() {
                    return Err(MegaError::InvalidTree(format!(
                        "root {} has a parent",
                        node.handle
                    )));
                }
                if let Some(existing) = &root {
                    return Err(MegaError::InvalidTree(format!(
                        "multiple roots: {} and {}",
                        existing, node.handle
                    )));
                }
                root = Some(node.handle.clone());
            } else if node.parent_handle.is_none() {
                return Err(MegaError::InvalidTree(format!(
                    "node {} has no parent",
                    node.handle
                )));
            }
            let handle = node.handle.clone();
            if by_handle.insert(handle.clone(), node).is_some() {
                return Err(MegaError::InvalidTree(format!("duplicate handle {}", handle)));
            }
        }

        let root = root.ok_or_else(|| MegaError::InvalidTree("listing has no root".to_string()))?;

        let mut children: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        for node in by_handle.values() {
            let Some(parent) = &node.parent_handle else {
                continue;
            };
            match by_handle.get(parent) {
                Some(p) if p.is_folder() => {}
                Some(_) => {
                    return Err(MegaError::InvalidTree(format!(
                        "parent of {} is not a folder",
                        node.handle
                    )))
                }
                None => {
                    return Err(MegaError::InvalidTree(format!(
                        "parent {} of {} is missing",
                        parent, node.handle
                    )))
                }
            }
            let siblings = children.entry(parent.clone()).or_default();
            if siblings.insert(node.name.clone(), node.handle.clone()).is_some() {
                return Err(MegaError::InvalidTree(format!(
                    "duplicate name {:?} in folder {}",
                    node.name, parent
                )));
            }
        }

        let tree = Self {
            root: Some(root),
            nodes: by_handle,
            children,
        };

        // Nodes caught in a parent cycle are never reached from the root.
        let reachable = tree.reachable_count();
        if reachable != tree.nodes.len() {
            return Err(MegaError::InvalidTree(format!(
                "{} node(s) unreachable from root",
                tree.nodes.len() - reachable
            )));
        }

        Ok(tree)
    }

    fn reachable_count(&self) -> usize {
        let Some(root) = &self.root else {
            return 0;
        };
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root.as_str()]);
        while let Some(handle) = queue.pop_front() {
            if !seen.insert(handle) {
                continue;
            }
            if let Some(kids) = self.children.get(handle) {
                queue.extend(kids.values().map(String::as_str));
            }
        }
        seen.len()
    }

    /// Number of nodes in the snapshot.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no listing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node, if a listing is loaded.
    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref().and_then(|h| self.nodes.get(h))
    }

    /// Look up a node by handle.
    pub fn get(&self, handle: &str) -> Option<&Node> {
        self.nodes.get(handle)
    }

    /// Direct children of `node`, ordered by name.
    ///
    /// The order is stable within this snapshot only.
    pub fn children(&self, node: &Node) -> Result<Vec<&Node>> {
        if !node.is_folder() {
            return Err(MegaError::NotADirectory(node.name.clone()));
        }
        Ok(self
            .children
            .get(&node.handle)
            .map(|kids| kids.values().filter_map(|h| self.nodes.get(h)).collect())
            .unwrap_or_default())
    }

    fn child_named(&self, parent: &str, name: &str) -> Option<&Node> {
        self.children
            .get(parent)
            .and_then(|kids| kids.get(name))
            .and_then(|h| self.nodes.get(h))
    }

    fn parent_of(&self, node: &Node) -> Option<&Node> {
        node.parent_handle.as_deref().and_then(|h| self.nodes.get(h))
    }

    /// Resolve `path` starting at `current` (a folder handle) for relative
    /// paths, or at the root for absolute ones.
    ///
    /// An empty path resolves to the current folder. A `current` handle that
    /// is not in this snapshot falls back to the root.
    pub fn resolve_from(&self, current: Option<&str>, path: &str) -> Result<&Node> {
        let root = self
            .root()
            .ok_or_else(|| MegaError::NotFound(format!("{} (tree not loaded)", path)))?;

        let mut node = if path.starts_with('/') {
            root
        } else {
            current.and_then(|h| self.nodes.get(h)).unwrap_or(root)
        };
        let mut walked = String::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !node.is_folder() {
                return Err(MegaError::NotADirectory(walked));
            }
            walked.push('/');
            walked.push_str(segment);
            node = match segment {
                "." => node,
                ".." => self.parent_of(node).unwrap_or(root),
                name => self
                    .child_named(&node.handle, name)
                    .ok_or_else(|| MegaError::NotFound(path.to_string()))?,
            };
        }

        Ok(node)
    }

    /// Resolve `path` with the root as current folder.
    pub fn resolve(&self, path: &str) -> Result<&Node> {
        self.resolve_from(None, path)
    }

    /// Absolute path of the node with `handle`.
    pub fn path_of(&self, handle: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut node = self.nodes.get(handle)?;
        while let Some(parent) = self.parent_of(node) {
            parts.push(node.name.as_str());
            node = parent;
        }
        if !node.is_root() {
            return None;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    /// Every node below `node`, depth-first, with its depth (children are 1).
    pub fn descendants(&self, node: &Node) -> Vec<(usize, &Node)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, &str)> = self
            .children
            .get(&node.handle)
            .map(|kids| kids.values().rev().map(|h| (1, h.as_str())).collect())
            .unwrap_or_default();

        while let Some((depth, handle)) = stack.pop() {
            let Some(child) = self.nodes.get(handle) else {
                continue;
            };
            out.push((depth, child));
            if let Some(kids) = self.children.get(handle) {
                stack.extend(kids.values().rev().map(|h| (depth + 1, h.as_str())));
            }
        }
        out
    }

    /// Flatten the snapshot, parents before children.
    pub fn to_nodes(&self) -> Vec<Node> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(self.nodes.len());
        out.push(root.clone());
        out.extend(self.descendants(root).into_iter().map(|(_, n)| n.clone()));
        out
    }

    /// Insert a node or update it in place (rename, move, new size).
    pub(crate) fn upsert(&mut self, node: Node) -> Result<()> {
        if node.is_root() {
            return Err(MegaError::InvalidTree("cannot upsert a root".to_string()));
        }
        let parent_handle = node
            .parent_handle
            .clone()
            .ok_or_else(|| MegaError::InvalidTree(format!("node {} has no parent", node.handle)))?;
        let parent = self
            .nodes
            .get(&parent_handle)
            .ok_or_else(|| MegaError::InvalidTree(format!("parent {} is missing", parent_handle)))?;
        if !parent.is_folder() {
            return Err(MegaError::InvalidTree(format!(
                "parent {} is not a folder",
                parent_handle
            )));
        }
        if let Some(existing) = self.child_named(&parent_handle, &node.name) {
            if existing.handle != node.handle {
                return Err(MegaError::InvalidTree(format!(
                    "duplicate name {:?} in folder {}",
                    node.name, parent_handle
                )));
            }
        }
        // Moving a folder below itself would detach it from the root.
        let mut cursor = Some(parent_handle.as_str());
        while let Some(h) = cursor {
            if h == node.handle {
                return Err(MegaError::InvalidTree(format!(
                    "moving {} under itself",
                    node.handle
                )));
            }
            cursor = self.nodes.get(h).and_then(|n| n.parent_handle.as_deref());
        }

        if let Some(old) = self.nodes.get(&node.handle) {
            if let Some(old_parent) = &old.parent_handle {
                if let Some(kids) = self.children.get_mut(old_parent) {
                    kids.remove(&old.name);
                }
            }
        }
        self.children
            .entry(parent_handle)
            .or_default()
            .insert(node.name.clone(), node.handle.clone());
        self.nodes.insert(node.handle.clone(), node);
        Ok(())
    }

    /// Remove a node and its whole subtree. Returns how many nodes went away.
    pub(crate) fn remove(&mut self, handle: &str) -> Result<usize> {
        let node = self
            .nodes
            .get(handle)
            .ok_or_else(|| MegaError::NotFound(handle.to_string()))?;
        if node.is_root() {
            return Err(MegaError::InvalidTree("cannot remove the root".to_string()));
        }
        if let Some(parent) = node.parent_handle.clone() {
            let name = node.name.clone();
            if let Some(kids) = self.children.get_mut(&parent) {
                kids.remove(&name);
            }
        }

        let mut removed = 0;
        let mut stack = vec![handle.to_string()];
        while let Some(h) = stack.pop() {
            if let Some(kids) = self.children.remove(&h) {
                stack.extend(kids.into_values());
            }
            if self.nodes.remove(&h).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Make `nodes` the complete set of direct children of `parent`.
    ///
    /// Children that are no longer listed are removed with their subtrees;
    /// folders that stay keep their cached descendants.
    pub(crate) fn replace_children(&mut self, parent: &str, nodes: Vec<Node>) -> Result<()> {
        match self.nodes.get(parent) {
            Some(p) if p.is_folder() => {}
            Some(_) => return Err(MegaError::NotADirectory(parent.to_string())),
            None => return Err(MegaError::NotFound(parent.to_string())),
        }
        if let Some(stray) = nodes
            .iter()
            .find(|n| n.parent_handle.as_deref() != Some(parent))
        {
            return Err(MegaError::InvalidTree(format!(
                "{} is not a child of {}",
                stray.handle, parent
            )));
        }

        let stale: Vec<String> = {
            let keep: HashSet<&str> = nodes.iter().map(|n| n.handle.as_str()).collect();
            self.children
                .get(parent)
                .map(|kids| {
                    kids.values()
                        .filter(|h| !keep.contains(h.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        for handle in stale {
            self.remove(&handle)?;
        }
        for node in nodes {
            self.upsert(node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// root -> docs/ -> a.txt (100 bytes), docs/sub/, music/
    pub(crate) fn sample_nodes() -> Vec<Node> {
        vec![
            Node::root("r"),
            Node::folder("d", "r", "docs"),
            Node::file("a", "d", "a.txt", 100),
            Node::folder("s", "d", "sub"),
            Node::file("b", "s", "b.txt", 7),
            Node::folder("m", "r", "music"),
        ]
    }

    fn sample() -> NodeTree {
        NodeTree::from_nodes(sample_nodes()).unwrap()
    }

    #[test]
    fn test_resolve_absolute_paths() {
        let tree = sample();
        let file = tree.resolve("/docs/a.txt").unwrap();
        assert_eq!(file.handle, "a");
        assert_eq!(file.size, 100);
        assert_eq!(tree.resolve("/").unwrap().handle, "r");
        assert_eq!(tree.resolve("/docs/sub/b.txt").unwrap().handle, "b");
        assert_eq!(tree.resolve("//docs///sub/").unwrap().handle, "s");
    }

    #[test]
    fn test_resolve_through_file_is_not_a_directory() {
        let tree = sample();
        assert!(matches!(
            tree.resolve("/docs/a.txt/x"),
            Err(MegaError::NotADirectory(p)) if p == "/docs/a.txt"
        ));
    }

    #[test]
    fn test_resolve_missing_segment_fails_fast() {
        let tree = sample();
        assert!(matches!(tree.resolve("/missing"), Err(MegaError::NotFound(_))));
        assert!(matches!(
            tree.resolve("/missing/a.txt"),
            Err(MegaError::NotFound(_))
        ));
        // Case-sensitive, no partial matches.
        assert!(tree.resolve("/Docs").is_err());
        assert!(tree.resolve("/doc").is_err());
    }

    #[test]
    fn test_resolve_relative_and_dot_segments() {
        let tree = sample();
        assert_eq!(tree.resolve_from(Some("d"), "").unwrap().handle, "d");
        assert_eq!(tree.resolve_from(Some("d"), "a.txt").unwrap().handle, "a");
        assert_eq!(tree.resolve_from(Some("s"), "../a.txt").unwrap().handle, "a");
        assert_eq!(tree.resolve_from(Some("s"), "./b.txt").unwrap().handle, "b");
        assert_eq!(tree.resolve_from(Some("d"), "/music").unwrap().handle, "m");
        assert_eq!(tree.resolve("/..").unwrap().handle, "r");
        // Unknown current folder falls back to root.
        assert_eq!(tree.resolve_from(Some("gone"), "docs").unwrap().handle, "d");
    }

    #[test]
    fn test_resolve_on_empty_tree() {
        let tree = NodeTree::empty();
        assert!(tree.is_empty());
        assert!(matches!(tree.resolve("/"), Err(MegaError::NotFound(_))));
    }

    #[test]
    fn test_children_and_descendants() {
        let tree = sample();
        let root = tree.root().unwrap();
        let names: Vec<&str> = tree
            .children(root)
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["docs", "music"]);

        let file = tree.resolve("/docs/a.txt").unwrap();
        assert!(matches!(tree.children(file), Err(MegaError::NotADirectory(_))));

        let docs = tree.resolve("/docs").unwrap();
        let walk: Vec<(usize, &str)> = tree
            .descendants(docs)
            .into_iter()
            .map(|(d, n)| (d, n.name.as_str()))
            .collect();
        assert_eq!(walk, vec![(1, "a.txt"), (1, "sub"), (2, "b.txt")]);
    }

    #[test]
    fn test_path_of() {
        let tree = sample();
        assert_eq!(tree.path_of("r").as_deref(), Some("/"));
        assert_eq!(tree.path_of("b").as_deref(), Some("/docs/sub/b.txt"));
        assert_eq!(tree.path_of("nope"), None);
    }

    #[test]
    fn test_from_nodes_rejects_invalid_listings() {
        let mut dup_name = sample_nodes();
        dup_name.push(Node::file("a2", "d", "a.txt", 1));
        assert!(matches!(
            NodeTree::from_nodes(dup_name),
            Err(MegaError::InvalidTree(_))
        ));

        let mut orphan = sample_nodes();
        orphan.push(Node::file("o", "ghost", "o.txt", 1));
        assert!(NodeTree::from_nodes(orphan).is_err());

        let mut under_file = sample_nodes();
        under_file.push(Node::file("x", "a", "x", 1));
        assert!(NodeTree::from_nodes(under_file).is_err());

        let mut two_roots = sample_nodes();
        two_roots.push(Node::root("r2"));
        assert!(NodeTree::from_nodes(two_roots).is_err());

        let cycle = vec![
            Node::root("r"),
            Node::folder("x", "y", "x"),
            Node::folder("y", "x", "y"),
        ];
        assert!(NodeTree::from_nodes(cycle).is_err());

        assert!(NodeTree::from_nodes(Vec::new()).is_err());
    }

    #[test]
    fn test_to_nodes_rebuilds_same_tree() {
        let tree = sample();
        let flat = tree.to_nodes();
        assert_eq!(flat.len(), 6);
        assert_eq!(flat[0].handle, "r");
        let rebuilt = NodeTree::from_nodes(flat).unwrap();
        assert_eq!(rebuilt.path_of("b"), tree.path_of("b"));
    }

    #[test]
    fn test_upsert_insert_rename_and_move() {
        let mut tree = sample();
        tree.upsert(Node::file("n", "m", "song.mp3", 5)).unwrap();
        assert_eq!(tree.resolve("/music/song.mp3").unwrap().handle, "n");

        tree.upsert(Node::file("n", "m", "renamed.mp3", 5)).unwrap();
        assert!(tree.resolve("/music/song.mp3").is_err());
        assert!(tree.resolve("/music/renamed.mp3").is_ok());

        tree.upsert(Node::folder("s", "m", "sub")).unwrap();
        assert_eq!(tree.resolve("/music/sub/b.txt").unwrap().handle, "b");
        assert!(tree.resolve("/docs/sub").is_err());
    }

    #[test]
    fn test_upsert_rejects_conflicts() {
        let mut tree = sample();
        assert!(tree.upsert(Node::file("z", "d", "a.txt", 1)).is_err());
        assert!(tree.upsert(Node::file("z", "a", "inside", 1)).is_err());
        assert!(tree.upsert(Node::folder("d", "s", "docs")).is_err());
        assert!(tree.upsert(Node::root("r")).is_err());
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut tree = sample();
        assert_eq!(tree.remove("d").unwrap(), 4);
        assert_eq!(tree.len(), 2);
        assert!(tree.get("b").is_none());
        assert!(tree.remove("r").is_err());
    }

    #[test]
    fn test_replace_children_keeps_surviving_subtrees() {
        let mut tree = sample();
        tree.replace_children(
            "d",
            vec![
                Node::folder("s", "d", "sub"),
                Node::file("c", "d", "c.txt", 3),
            ],
        )
        .unwrap();
        assert!(tree.get("a").is_none());
        assert_eq!(tree.resolve("/docs/sub/b.txt").unwrap().handle, "b");
        assert_eq!(tree.resolve("/docs/c.txt").unwrap().size, 3);

        let err = tree.replace_children("d", vec![Node::file("q", "m", "q", 1)]);
        assert!(matches!(err, Err(MegaError::InvalidTree(_))));
    }
}
