//! Pull a remote subtree into the local store
//!
//! The remote tree is walked breadth first, so every discovered node comes
//! after its parent. Nodes already linked locally are updated in place;
//! the rest are inserted. Everything is saved in one transaction.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::info;

use super::error::{Result, SyncError};
use crate::context::SyncContext;
use crate::remote::{RemoteClient, RemoteNode};
use crate::store::NodeStore;
use crate::tree::{NodeKind, PulledNode, PulledParent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub root_local_id: i64,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct RemoteTreeBuilder {
    store: Arc<dyn NodeStore>,
    remote: Arc<dyn RemoteClient>,
}

impl RemoteTreeBuilder {
    pub fn new(store: Arc<dyn NodeStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self { store, remote }
    }

    pub async fn pull_subtree(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<PullReport> {
        let root = self.remote.get(ctx, kind, remote_id).await?;
        let parent = self.local_parent(kind, &root).await?;

        let mut pulled = vec![self.discovered(kind, root, parent).await?];
        let mut queue = VecDeque::from([(0usize, kind, remote_id)]);

        while let Some((index, kind, remote_id)) = queue.pop_front() {
            let Some(child_kind) = kind.child() else {
                continue;
            };

            let ids = self.remote.list_children(ctx, kind, remote_id).await?;
            let children =
                try_join_all(ids.iter().map(|id| self.remote.get(ctx, child_kind, *id))).await?;

            for child in children {
                if child.kind() != child_kind {
                    return Err(SyncError::Inconsistent(format!(
                        "remote {} {} listed a {} as child",
                        kind,
                        remote_id,
                        child.kind()
                    )));
                }
                let child_id = child.id;
                let entry = self
                    .discovered(child_kind, child, PulledParent::Pulled(index))
                    .await?;
                queue.push_back((pulled.len(), child_kind, child_id));
                pulled.push(entry);
            }
        }

        let updated = pulled.iter().filter(|n| n.existing.is_some()).count();
        let inserted = pulled.len() - updated;

        let saved = self.store.save_tree(pulled).await?;
        let root_local_id = saved
            .first()
            .map(|n| n.local_id)
            .ok_or_else(|| SyncError::Inconsistent("pulled tree was not saved".to_string()))?;

        info!(
            "Pulled {} {} into {}: {} inserted, {} updated",
            kind, remote_id, root_local_id, inserted, updated
        );
        Ok(PullReport {
            root_local_id,
            inserted,
            updated,
        })
    }

    /// Where the pulled root attaches locally
    async fn local_parent(&self, kind: NodeKind, root: &RemoteNode) -> Result<PulledParent> {
        match (kind.parent(), root.parent_id) {
            (None, None) => Ok(PulledParent::Local(None)),
            (Some(parent_kind), Some(parent_remote_id)) => {
                let parent = self
                    .store
                    .find_by_remote_id(parent_kind, parent_remote_id)
                    .await?
                    .ok_or(SyncError::ParentNotLinked {
                        kind,
                        remote_id: parent_remote_id,
                    })?;
                Ok(PulledParent::Local(Some(parent.local_id)))
            }
            _ => Err(SyncError::Inconsistent(format!(
                "remote {} {} has an unexpected parent {:?}",
                kind, root.id, root.parent_id
            ))),
        }
    }

    async fn discovered(
        &self,
        kind: NodeKind,
        node: RemoteNode,
        parent: PulledParent,
    ) -> Result<PulledNode> {
        let existing = self
            .store
            .find_by_remote_id(kind, node.id)
            .await?
            .map(|n| n.local_id);

        Ok(PulledNode {
            existing,
            remote_id: node.id,
            parent,
            position: node.position,
            payload: node.payload,
        })
    }
}
