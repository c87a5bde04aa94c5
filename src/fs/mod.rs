//! Remote node tree: node types, snapshots and the shared cache.

pub(crate) mod node;
mod shared;
pub(crate) mod tree;

pub use node::{Node, NodeType};
pub use shared::SharedTree;
pub use tree::NodeTree;
