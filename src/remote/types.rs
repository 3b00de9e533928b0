//! Remote platform types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{Node, NodeKind, Payload};

/// A node as currently stored on the remote platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: i64,
    #[serde(rename = "parentId")]
    pub parent_id: Option<i64>,
    pub position: i32,
    pub payload: Payload,
}

impl RemoteNode {
    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }
}

/// Body of a remote create or update
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    /// Remote id of the parent
    pub parent_id: Option<i64>,
    pub position: i32,
    pub payload: Payload,
}

impl RemoteWrite {
    /// Mirror a local node under its parent's remote id
    pub fn from_node(node: &Node, parent_remote_id: Option<i64>) -> Self {
        Self {
            parent_id: parent_remote_id,
            position: node.position,
            payload: node.payload.clone(),
        }
    }

    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }
}

impl From<&RemoteNode> for RemoteWrite {
    fn from(node: &RemoteNode) -> Self {
        Self {
            parent_id: node.parent_id,
            position: node.position,
            payload: node.payload.clone(),
        }
    }
}

/// Raw acknowledgment of a create call.
///
/// `identifier` is the new remote id when creation succeeded, or the
/// challenge site key when the platform asks for proof of a human.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAck {
    pub identifier: String,
    pub position: Option<i32>,
    pub challenge_token: Option<String>,
}

/// Remote platform errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote {kind} {id} not found")]
    NotFound { kind: NodeKind, id: i64 },

    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected remote response: {0}")]
    Decode(String),

    #[error("No remote credentials for user {0}")]
    Auth(i64),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}
