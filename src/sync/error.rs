//! Sync error types

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::tree::NodeKind;

/// Errors raised while mirroring a node to the remote platform
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Node not found: {0}")]
    NotFound(i64),

    #[error("Node {id} is a {found}, expected a {expected}")]
    WrongKind {
        id: i64,
        expected: NodeKind,
        found: NodeKind,
    },

    #[error("{kind} {id} is not synced to the remote platform")]
    NotSynced { kind: NodeKind, id: i64 },

    #[error("Parent of {kind} {id} is not synced to the remote platform")]
    ParentNotSynced { kind: NodeKind, id: i64 },

    #[error("{kind} {id} is already synced as remote {remote_id}")]
    AlreadySynced {
        kind: NodeKind,
        id: i64,
        remote_id: i64,
    },

    #[error("{kind} {id} still has synced children")]
    HasSyncedChildren { kind: NodeKind, id: i64 },

    #[error("Remote parent {remote_id} of a pulled {kind} is not linked to a local node")]
    ParentNotLinked { kind: NodeKind, remote_id: i64 },

    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    #[error("Sync task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
