//! Per-level node sync
//!
//! One [`NodeSyncService`] per [`NodeKind`]. The logic is identical for all
//! four levels; only the kind differs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::challenge::{ChallengeTokens, CreateOutcome, SyncOutcome};
use super::error::{Result, SyncError};
use super::reconciler::{fetch_linked, PositionReconciler};
use crate::context::SyncContext;
use crate::remote::{RemoteClient, RemoteNode, RemoteWrite};
use crate::store::NodeStore;
use crate::tree::{Node, NodeKind};

#[derive(Clone)]
pub struct NodeSyncService {
    kind: NodeKind,
    store: Arc<dyn NodeStore>,
    remote: Arc<dyn RemoteClient>,
    reconciler: PositionReconciler,
    tokens: Arc<ChallengeTokens>,
}

impl NodeSyncService {
    pub fn new(
        kind: NodeKind,
        store: Arc<dyn NodeStore>,
        remote: Arc<dyn RemoteClient>,
        tokens: Arc<ChallengeTokens>,
    ) -> Self {
        let reconciler = PositionReconciler::new(store.clone(), remote.clone());
        Self {
            kind,
            store,
            remote,
            reconciler,
            tokens,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Create the remote counterpart of a local node.
    ///
    /// Without an explicit `challenge_token` the token cached for the user
    /// is offered. A challenge leaves the local store untouched.
    pub async fn sync_new(
        &self,
        ctx: &SyncContext,
        id: i64,
        challenge_token: Option<String>,
    ) -> Result<SyncOutcome> {
        let node = self.load(id).await?;
        if let Some(remote_id) = node.remote_id {
            return Err(SyncError::AlreadySynced {
                kind: self.kind,
                id,
                remote_id,
            });
        }

        let parent_remote_id = self.parent_remote_id(&node).await?;
        let write = RemoteWrite::from_node(&node, parent_remote_id);

        let cached = match challenge_token {
            None if self.kind.may_require_challenge() => self.tokens.get(ctx.user_id),
            _ => None,
        };
        let used_cached = cached.is_some();
        let token = challenge_token.or(cached);

        let ack = self
            .remote
            .create(ctx, self.kind, &write, token.as_deref())
            .await?;
        let position = ack.position.unwrap_or(write.position);

        match CreateOutcome::classify(ack)? {
            CreateOutcome::ChallengeRequired { site_key } => {
                if !self.kind.may_require_challenge() {
                    return Err(SyncError::Inconsistent(format!(
                        "remote asked for a challenge to create {} {}",
                        self.kind, id
                    )));
                }
                if used_cached {
                    debug!("Cached challenge token for user {} was refused", ctx.user_id);
                    self.tokens.forget(ctx.user_id);
                }
                info!("Creating {} {} requires a challenge", self.kind, id);
                Ok(SyncOutcome::ChallengeRequired { site_key })
            }
            CreateOutcome::Created {
                remote_id,
                challenge_token,
            } => {
                if let Some(token) = challenge_token {
                    self.tokens.remember(ctx.user_id, token);
                }
                self.store.set_remote_id(id, Some(remote_id)).await?;
                info!("Created {} {} as remote {}", self.kind, id, remote_id);

                let report = self
                    .reconciler
                    .reconcile_after_insertion(ctx, &node, position)
                    .await?;
                if report.failed > 0 {
                    warn!(
                        "{} siblings of {} {} kept their remote slot after the create",
                        report.failed, self.kind, id
                    );
                }

                Ok(SyncOutcome::Synced {
                    node: RemoteNode {
                        id: remote_id,
                        parent_id: parent_remote_id,
                        position,
                        payload: write.payload,
                    },
                })
            }
        }
    }

    /// Push the payload and position of a linked node. Sibling positions
    /// are shifted on both sides when the remote position differs.
    pub async fn update_remote(&self, ctx: &SyncContext, id: i64) -> Result<RemoteNode> {
        let node = self.load(id).await?;
        if !node.is_synced() {
            return Err(SyncError::NotSynced {
                kind: self.kind,
                id,
            });
        }

        let parent_remote_id = self.parent_remote_id(&node).await?;
        let desired = node.position;
        self.reconciler
            .reconcile(ctx, &node, parent_remote_id, desired)
            .await
    }

    /// Delete a linked node on both sides.
    ///
    /// Remote siblings behind it move up first, then the remote node is
    /// deleted, then the local record goes and the local gap closes.
    pub async fn delete_remote(&self, ctx: &SyncContext, id: i64) -> Result<()> {
        let node = self.load(id).await?;
        let remote_id = node.remote_id.ok_or(SyncError::NotSynced {
            kind: self.kind,
            id,
        })?;

        let children = self.store.children(&node).await?;
        if children.iter().any(Node::is_synced) {
            return Err(SyncError::HasSyncedChildren {
                kind: self.kind,
                id,
            });
        }

        let live = fetch_linked(self.remote.as_ref(), ctx, &node, remote_id).await?;
        let report = self
            .reconciler
            .reconcile_after_deletion(ctx, &node, live.position)
            .await?;
        if report.failed > 0 {
            warn!(
                "{} siblings of {} {} kept a stale remote position",
                report.failed, self.kind, id
            );
        }

        self.remote.delete(ctx, self.kind, remote_id).await?;
        self.store.remove(id).await?;
        info!("Deleted {} {} (remote {})", self.kind, id, remote_id);
        Ok(())
    }

    pub async fn fetch_remote(&self, ctx: &SyncContext, remote_id: i64) -> Result<RemoteNode> {
        Ok(self.remote.get(ctx, self.kind, remote_id).await?)
    }

    async fn load(&self, id: i64) -> Result<Node> {
        let node = self.store.get(id).await?.ok_or(SyncError::NotFound(id))?;
        if node.kind() != self.kind {
            return Err(SyncError::WrongKind {
                id,
                expected: self.kind,
                found: node.kind(),
            });
        }
        Ok(node)
    }

    /// Remote id of the node's parent, `None` for courses
    async fn parent_remote_id(&self, node: &Node) -> Result<Option<i64>> {
        let Some(parent_id) = node.parent_id else {
            return Ok(None);
        };

        let parent = self
            .store
            .get(parent_id)
            .await?
            .ok_or(SyncError::NotFound(parent_id))?;
        parent
            .remote_id
            .map(Some)
            .ok_or(SyncError::ParentNotSynced {
                kind: self.kind,
                id: node.local_id,
            })
    }
}

/// The four per-level services sharing one store, client and token cache
#[derive(Clone)]
pub struct NodeSyncServices {
    course: NodeSyncService,
    section: NodeSyncService,
    lesson: NodeSyncService,
    step: NodeSyncService,
}

impl NodeSyncServices {
    pub fn new(store: Arc<dyn NodeStore>, remote: Arc<dyn RemoteClient>) -> Self {
        let tokens = Arc::new(ChallengeTokens::new());
        let service = |kind| NodeSyncService::new(kind, store.clone(), remote.clone(), tokens.clone());
        Self {
            course: service(NodeKind::Course),
            section: service(NodeKind::Section),
            lesson: service(NodeKind::Lesson),
            step: service(NodeKind::Step),
        }
    }

    pub fn for_kind(&self, kind: NodeKind) -> &NodeSyncService {
        match kind {
            NodeKind::Course => &self.course,
            NodeKind::Section => &self.section,
            NodeKind::Lesson => &self.lesson,
            NodeKind::Step => &self.step,
        }
    }
}
