//! Remote client trait

use async_trait::async_trait;

use super::types::{CreateAck, RemoteError, RemoteNode, RemoteWrite};
use crate::context::SyncContext;
use crate::tree::NodeKind;

/// Typed access to the remote learning platform.
///
/// Every call is signed on behalf of `ctx.user_id`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create a node. A challenge is reported through the acknowledgment,
    /// not as an error.
    async fn create(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        write: &RemoteWrite,
        challenge_token: Option<&str>,
    ) -> Result<CreateAck, RemoteError>;

    /// Replace payload and position of a node
    async fn update(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
        write: &RemoteWrite,
    ) -> Result<RemoteNode, RemoteError>;

    async fn get(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<RemoteNode, RemoteError>;

    async fn delete(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<(), RemoteError>;

    /// Remote ids of the children of a `kind` node, in position order
    async fn list_children(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<Vec<i64>, RemoteError>;
}
