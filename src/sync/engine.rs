//! Sync engine facade
//!
//! Entry point for the HTTP layer. Resolves the level of a node and hands
//! the call to the matching service.

use std::sync::Arc;

use super::cascade::{CascadeOrchestrator, CascadeReport};
use super::challenge::SyncOutcome;
use super::error::{Result, SyncError};
use super::node::NodeSyncServices;
use super::pull::{PullReport, RemoteTreeBuilder};
use crate::context::SyncContext;
use crate::remote::{RemoteClient, RemoteNode};
use crate::store::NodeStore;
use crate::tree::NodeKind;

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn NodeStore>,
    services: NodeSyncServices,
    cascade: CascadeOrchestrator,
    pull: RemoteTreeBuilder,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn NodeStore>,
        remote: Arc<dyn RemoteClient>,
        max_concurrency: usize,
    ) -> Self {
        let services = NodeSyncServices::new(store.clone(), remote.clone());
        let cascade = CascadeOrchestrator::new(store.clone(), services.clone(), max_concurrency);
        let pull = RemoteTreeBuilder::new(store.clone(), remote);

        Self {
            store,
            services,
            cascade,
            pull,
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    async fn kind_of(&self, id: i64) -> Result<NodeKind> {
        self.store
            .get(id)
            .await?
            .map(|n| n.kind())
            .ok_or(SyncError::NotFound(id))
    }

    /// Create a node remotely, optionally with a solved challenge token
    pub async fn sync_node(
        &self,
        ctx: &SyncContext,
        id: i64,
        challenge_token: Option<String>,
    ) -> Result<SyncOutcome> {
        let kind = self.kind_of(id).await?;
        self.services
            .for_kind(kind)
            .sync_new(ctx, id, challenge_token)
            .await
    }

    pub async fn update_node(&self, ctx: &SyncContext, id: i64) -> Result<RemoteNode> {
        let kind = self.kind_of(id).await?;
        self.services.for_kind(kind).update_remote(ctx, id).await
    }

    pub async fn delete_node(&self, ctx: &SyncContext, id: i64) -> Result<()> {
        let kind = self.kind_of(id).await?;
        self.services.for_kind(kind).delete_remote(ctx, id).await
    }

    pub async fn fetch_remote(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<RemoteNode> {
        self.services.for_kind(kind).fetch_remote(ctx, remote_id).await
    }

    pub async fn sync_subtree(&self, ctx: &SyncContext, id: i64) -> Result<CascadeReport> {
        self.cascade.sync_subtree(ctx, id).await
    }

    pub async fn delete_subtree(&self, ctx: &SyncContext, id: i64) -> Result<CascadeReport> {
        self.cascade.delete_subtree(ctx, id).await
    }

    pub async fn pull_subtree(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<PullReport> {
        self.pull.pull_subtree(ctx, kind, remote_id).await
    }
}
