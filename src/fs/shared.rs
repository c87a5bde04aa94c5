//! Shared, swappable tree cache.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{MegaError, Result};
use crate::fs::node::Node;
use crate::fs::tree::NodeTree;

/// The session's view of the remote tree.
///
/// Readers clone an `Arc` to the current snapshot and work on it without
/// holding any lock, so a concurrent [`replace`](Self::replace) is observed
/// either entirely or not at all.
#[derive(Clone, Default)]
pub struct SharedTree {
    tree: Arc<RwLock<Arc<NodeTree>>>,
    current: Arc<RwLock<Option<String>>>,
}

impl SharedTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot published right now.
    pub fn snapshot(&self) -> Arc<NodeTree> {
        self.tree.read().clone()
    }

    /// Publish a new snapshot.
    pub fn replace(&self, tree: NodeTree) {
        *self.tree.write() = Arc::new(tree);
    }

    /// Validate a full listing and publish it. The old snapshot stays
    /// in place when validation fails.
    pub fn replace_nodes(&self, nodes: Vec<Node>) -> Result<()> {
        let tree = NodeTree::from_nodes(nodes)?;
        self.replace(tree);
        Ok(())
    }

    /// Drop the cached tree and reset the current folder.
    pub fn clear(&self) {
        self.replace(NodeTree::empty());
        *self.current.write() = None;
    }

    /// Apply a patch to a private copy and publish it if the patch succeeds.
    ///
    /// The write lock is held across the copy so concurrent patches are not
    /// lost.
    pub(crate) fn patch<T>(&self, f: impl FnOnce(&mut NodeTree) -> Result<T>) -> Result<T> {
        let mut guard = self.tree.write();
        let mut next = NodeTree::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    /// Resolve a path against the current folder.
    pub fn resolve(&self, path: &str) -> Result<Node> {
        let current = self.current.read().clone();
        let snapshot = self.snapshot();
        snapshot.resolve_from(current.as_deref(), path).cloned()
    }

    /// Direct children of `node` in the current snapshot.
    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        let snapshot = self.snapshot();
        let fresh = snapshot
            .get(&node.handle)
            .ok_or_else(|| MegaError::NotFound(node.name.clone()))?;
        Ok(snapshot.children(fresh)?.into_iter().cloned().collect())
    }

    /// The current folder, or the root when it is unset or no longer exists.
    pub fn current_folder(&self) -> Option<Node> {
        let current = self.current.read().clone();
        let snapshot = self.snapshot();
        current
            .as_deref()
            .and_then(|h| snapshot.get(h))
            .or_else(|| snapshot.root())
            .cloned()
    }

    /// Absolute path of the current folder.
    pub fn current_path(&self) -> String {
        self.current_folder()
            .and_then(|n| self.snapshot().path_of(&n.handle))
            .unwrap_or_else(|| "/".to_string())
    }

    /// Make `node` the folder relative paths are resolved from.
    pub fn set_current_folder(&self, node: &Node) -> Result<()> {
        if !node.is_folder() {
            return Err(MegaError::NotADirectory(node.name.clone()));
        }
        if self.snapshot().get(&node.handle).is_none() {
            return Err(MegaError::NotFound(node.name.clone()));
        }
        *self.current.write() = Some(node.handle.clone());
        Ok(())
    }

    pub(crate) fn current_handle(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub(crate) fn set_current_handle(&self, handle: Option<String>) {
        *self.current.write() = handle;
    }
}

impl std::fmt::Debug for SharedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTree")
            .field("nodes", &self.snapshot().len())
            .field("current", &self.current_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tree::tests::sample_nodes;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_current_folder_and_relative_resolve() {
        let shared = SharedTree::new();
        assert!(shared.current_folder().is_none());
        shared.replace_nodes(sample_nodes()).unwrap();

        assert_eq!(shared.current_folder().unwrap().handle, "r");
        let docs = shared.resolve("docs").unwrap();
        shared.set_current_folder(&docs).unwrap();
        assert_eq!(shared.resolve("a.txt").unwrap().handle, "a");
        assert_eq!(shared.current_path(), "/docs");

        let file = shared.resolve("a.txt").unwrap();
        assert!(matches!(
            shared.set_current_folder(&file),
            Err(MegaError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_current_folder_falls_back_to_root_after_replace() {
        let shared = SharedTree::new();
        shared.replace_nodes(sample_nodes()).unwrap();
        let sub = shared.resolve("/docs/sub").unwrap();
        shared.set_current_folder(&sub).unwrap();

        shared
            .replace_nodes(vec![Node::root("r"), Node::folder("m", "r", "music")])
            .unwrap();
        assert_eq!(shared.current_folder().unwrap().handle, "r");
        assert_eq!(shared.resolve("music").unwrap().handle, "m");
    }

    #[test]
    fn test_invalid_listing_keeps_old_snapshot() {
        let shared = SharedTree::new();
        shared.replace_nodes(sample_nodes()).unwrap();
        let bad = vec![Node::root("r"), Node::file("x", "missing", "x", 1)];
        assert!(matches!(
            shared.replace_nodes(bad),
            Err(MegaError::InvalidTree(_))
        ));
        assert_eq!(shared.snapshot().len(), 6);
    }

    #[test]
    fn test_failed_patch_is_not_published() {
        let shared = SharedTree::new();
        shared.replace_nodes(sample_nodes()).unwrap();
        let before = shared.snapshot();
        let res = shared.patch(|t| {
            t.remove("a")?;
            t.upsert(Node::file("z", "ghost", "z", 1))
        });
        assert!(res.is_err());
        assert!(Arc::ptr_eq(&before, &shared.snapshot()));
        assert!(shared.resolve("/docs/a.txt").is_ok());
    }

    #[test]
    fn test_clear_empties_tree() {
        let shared = SharedTree::new();
        shared.replace_nodes(sample_nodes()).unwrap();
        shared.clear();
        assert!(shared.snapshot().is_empty());
        assert!(matches!(shared.resolve("/docs"), Err(MegaError::NotFound(_))));
    }

    fn generation(gen: u64) -> Vec<Node> {
        vec![
            Node::root("r"),
            Node::folder("v", "r", "v"),
            Node::file(format!("a{}", gen), "v", "a", gen),
            Node::file(format!("b{}", gen), "v", "b", gen),
        ]
    }

    #[test]
    fn test_replace_is_atomic_for_readers() {
        let shared = SharedTree::new();
        shared.replace_nodes(generation(0)).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut checks = 0u64;
                    while !done.load(Ordering::Relaxed) {
                        let snap = shared.snapshot();
                        let a = snap.resolve("/v/a").unwrap();
                        let b = snap.resolve("/v/b").unwrap();
                        assert_eq!(a.size, b.size, "mixed snapshot observed");
                        checks += 1;
                    }
                    checks
                })
            })
            .collect();

        for gen in 1..=500 {
            shared.replace_nodes(generation(gen)).unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(shared.resolve("/v/a").unwrap().size, 500);
    }
}
