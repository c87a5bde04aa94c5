//! Remote filesystem node types.

use serde::{Deserialize, Serialize};

/// Node type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Regular file
    File,
    /// Folder/directory
    Folder,
    /// Root folder (Cloud Drive)
    Root,
}

impl NodeType {
    /// Check if this node type can have children.
    pub fn is_container(&self) -> bool {
        matches!(self, NodeType::Folder | NodeType::Root)
    }
}

/// A node in the remote hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node handle (unique identifier)
    pub handle: String,
    /// Parent node handle, `None` only for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,
    /// Node name
    pub name: String,
    /// Node type
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// File size in bytes (0 for folders)
    #[serde(default)]
    pub size: u64,
    /// Modification timestamp (Unix epoch seconds)
    #[serde(default)]
    pub timestamp: i64,
    /// Opaque per-node key material handed out by the transport
    #[serde(default, with = "crate::base64::bytes", skip_serializing_if = "Vec::is_empty")]
    pub(crate) key: Vec<u8>,
}

impl Node {
    /// Build the root node.
    pub fn root(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            parent_handle: None,
            name: "Root".to_string(),
            node_type: NodeType::Root,
            size: 0,
            timestamp: 0,
            key: Vec::new(),
        }
    }

    /// Build a folder node under `parent`.
    pub fn folder(
        handle: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            parent_handle: Some(parent.into()),
            name: name.into(),
            node_type: NodeType::Folder,
            size: 0,
            timestamp: 0,
            key: Vec::new(),
        }
    }

    /// Build a file node under `parent`.
    pub fn file(
        handle: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            handle: handle.into(),
            parent_handle: Some(parent.into()),
            name: name.into(),
            node_type: NodeType::File,
            size,
            timestamp: 0,
            key: Vec::new(),
        }
    }

    /// Set the modification timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach opaque key material.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = key;
        self
    }

    /// Key material attached by the transport, if any.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    /// Check if this node is a folder (root included).
    pub fn is_folder(&self) -> bool {
        self.node_type.is_container()
    }

    /// Check if this node is the root.
    pub fn is_root(&self) -> bool {
        self.node_type == NodeType::Root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_helper_methods() {
        let file_node = Node::file("h1", "r", "test.txt", 100);
        assert!(file_node.is_file());
        assert!(!file_node.is_folder());
        assert_eq!(file_node.size, 100);

        let folder_node = Node::folder("h2", "r", "Folder");
        assert!(!folder_node.is_file());
        assert!(folder_node.is_folder());
        assert!(!folder_node.is_root());

        let root = Node::root("r");
        assert!(root.is_folder());
        assert!(root.is_root());
        assert_eq!(root.parent_handle, None);
    }

    #[test]
    fn test_node_serde_keeps_key_bytes() {
        let node = Node::file("h1", "r", "a.bin", 3)
            .with_timestamp(1_700_000_000)
            .with_key(vec![0xfb, 0xff, 0x00, 0x10]);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains(r#""type":"file""#));
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.key(), &[0xfb, 0xff, 0x00, 0x10]);
    }

    #[test]
    fn test_node_deserialize_ignores_unknown_fields() {
        let json = r#"{"handle":"h","parent_handle":"r","name":"n","type":"folder","colour":"red"}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert!(node.is_folder());
        assert!(node.key().is_empty());
    }
}
