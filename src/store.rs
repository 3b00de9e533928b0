//! Local node store
//!
//! The sync core only sees the store through [`NodeStore`]. Every mutating
//! operation is atomic and keeps sibling positions contiguous (`1..=N`).

use async_trait::async_trait;
use thiserror::Error;

use crate::tree::{NewNode, Node, NodeKind, Payload, PulledNode};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NotFound(i64),

    #[error("Invalid parent for {kind}: {reason}")]
    InvalidParent { kind: NodeKind, reason: String },

    #[error("Payload of kind {found} cannot be stored on a {expected} node")]
    KindMismatch { expected: NodeKind, found: NodeKind },

    #[error("Corrupt node row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Get a node by local id
    async fn get(&self, id: i64) -> Result<Option<Node>, StoreError>;

    /// Get the local node linked to a remote id
    async fn find_by_remote_id(
        &self,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<Option<Node>, StoreError>;

    /// Siblings under `parent_id`, ordered by position
    async fn find_siblings_ordered(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
    ) -> Result<Vec<Node>, StoreError>;

    /// Highest sibling position under `parent_id`
    async fn max_position(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
    ) -> Result<Option<i32>, StoreError>;

    /// Add `delta` to the position of every sibling in `[from, to]`.
    /// Returns the number of shifted nodes.
    async fn shift_range(
        &self,
        kind: NodeKind,
        parent_id: Option<i64>,
        from: i32,
        to: i32,
        delta: i32,
    ) -> Result<u64, StoreError>;

    /// Create a node, appending it or inserting it with a sibling shift
    async fn insert(&self, node: NewNode) -> Result<Node, StoreError>;

    /// Move a node to `position` (clamped to `1..=N`), shifting the
    /// siblings in between. A no-op when the node is already there.
    async fn move_node(&self, id: i64, position: i32) -> Result<Node, StoreError>;

    /// Replace the payload of a node
    async fn update_payload(&self, id: i64, payload: Payload) -> Result<Node, StoreError>;

    /// Link or unlink the remote counterpart of a node
    async fn set_remote_id(&self, id: i64, remote_id: Option<i64>) -> Result<(), StoreError>;

    /// Delete a node with its local subtree and close the sibling gap
    async fn remove(&self, id: i64) -> Result<(), StoreError>;

    /// Upsert a pulled subtree in one transaction. Entries must be ordered
    /// parent before child. Returns the saved nodes in input order.
    async fn save_tree(&self, nodes: Vec<PulledNode>) -> Result<Vec<Node>, StoreError>;

    /// Direct children of a node
    async fn children(&self, node: &Node) -> Result<Vec<Node>, StoreError> {
        match node.kind().child() {
            Some(kind) => self.find_siblings_ordered(kind, Some(node.local_id)).await,
            None => Ok(Vec::new()),
        }
    }
}
