//! Position reconciliation between the local store and the remote platform
//!
//! Moving a node from `old` to `new` shifts every sibling between the two
//! slots by one. The local side is shifted first, in one transaction, so the
//! store always shows the intended final order. Remote siblings are then
//! patched one at a time from their live remote position; a sibling that
//! fails is logged and skipped without aborting the move.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::{Result, SyncError};
use crate::context::SyncContext;
use crate::remote::{RemoteClient, RemoteError, RemoteNode, RemoteWrite};
use crate::store::NodeStore;
use crate::tree::Node;

/// Outcome of a sibling shift pass, logged at debug
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Siblings whose remote position was patched
    pub shifted: usize,
    /// Siblings missing on the remote side
    pub skipped: usize,
    /// Siblings whose remote update failed for another reason
    pub failed: usize,
}

#[derive(Clone)]
pub struct PositionReconciler {
    store: Arc<dyn NodeStore>,
    remote: Arc<dyn RemoteClient>,
}

impl PositionReconciler {
    pub fn new(store: Arc<dyn NodeStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self { store, remote }
    }

    /// Move `node` to `desired` on both sides and return its remote state
    /// afterwards.
    pub async fn reconcile(
        &self,
        ctx: &SyncContext,
        node: &Node,
        parent_remote_id: Option<i64>,
        desired: i32,
    ) -> Result<RemoteNode> {
        let kind = node.kind();
        let remote_id = node.remote_id.ok_or(SyncError::NotSynced {
            kind,
            id: node.local_id,
        })?;

        let current = fetch_linked(self.remote.as_ref(), ctx, node, remote_id).await?;
        let old = current.position;

        let count = self
            .store
            .max_position(kind, node.parent_id)
            .await?
            .unwrap_or(1);
        let desired = desired.clamp(1, count.max(1));

        if desired == old {
            let write = RemoteWrite::from_node(node, parent_remote_id).with_position(desired);
            return Ok(self.remote.update(ctx, kind, remote_id, &write).await?);
        }

        let moved = self.store.move_node(node.local_id, desired).await?;

        let (range, delta) = if desired < old {
            (desired..=old - 1, 1)
        } else {
            (old + 1..=desired, -1)
        };
        let report = self
            .shift_remote_siblings(ctx, &moved, |live, _| range.contains(&live), delta)
            .await?;
        debug!(
            "Moved {} {} from {} to {}: {:?}",
            kind, node.local_id, old, desired, report
        );

        let write = RemoteWrite::from_node(&moved, parent_remote_id).with_position(desired);
        self.remote.update(ctx, kind, remote_id, &write).await?;

        fetch_linked(self.remote.as_ref(), ctx, &moved, remote_id).await
    }

    /// Close the gap left by a node deleted at `deleted_position`: every
    /// remote sibling behind it moves up by one. The local gap is closed
    /// when the node's record is removed.
    pub async fn reconcile_after_deletion(
        &self,
        ctx: &SyncContext,
        deleted: &Node,
        deleted_position: i32,
    ) -> Result<ReconcileReport> {
        let report = self
            .shift_remote_siblings(ctx, deleted, |live, _| live > deleted_position, -1)
            .await?;
        debug!(
            "Closed remote gap at {} after deleting {} {}: {:?}",
            deleted_position,
            deleted.kind(),
            deleted.local_id,
            report
        );
        Ok(report)
    }

    /// Open a remote slot at `position` for a node that was just created
    /// there. The local siblings were shifted when the node was inserted,
    /// so only synced siblings whose remote position still lags their local
    /// one move down by one.
    pub async fn reconcile_after_insertion(
        &self,
        ctx: &SyncContext,
        inserted: &Node,
        position: i32,
    ) -> Result<ReconcileReport> {
        let report = self
            .shift_remote_siblings(
                ctx,
                inserted,
                |live, sibling| live >= position && live < sibling.position,
                1,
            )
            .await?;
        debug!(
            "Opened remote slot at {} for {} {}: {:?}",
            position,
            inserted.kind(),
            inserted.local_id,
            report
        );
        Ok(report)
    }

    /// Apply `delta` to the remote position of every synced sibling of
    /// `node` for which `in_range(live position, sibling)` holds.
    async fn shift_remote_siblings<F>(
        &self,
        ctx: &SyncContext,
        node: &Node,
        in_range: F,
        delta: i32,
    ) -> Result<ReconcileReport>
    where
        F: Fn(i32, &Node) -> bool + Send + Sync,
    {
        let kind = node.kind();
        let siblings = self
            .store
            .find_siblings_ordered(kind, node.parent_id)
            .await?;

        let mut report = ReconcileReport::default();
        for sibling in siblings.iter().filter(|s| s.local_id != node.local_id) {
            let Some(remote_id) = sibling.remote_id else {
                continue;
            };

            let live = match self.remote.get(ctx, kind, remote_id).await {
                Ok(live) => live,
                Err(e) => {
                    note_sibling_failure(&mut report, sibling, &e);
                    continue;
                }
            };
            if !in_range(live.position, sibling) {
                continue;
            }

            let write = RemoteWrite::from(&live).with_position(live.position + delta);
            match self.remote.update(ctx, kind, remote_id, &write).await {
                Ok(_) => report.shifted += 1,
                Err(e) => note_sibling_failure(&mut report, sibling, &e),
            }
        }

        Ok(report)
    }
}

fn note_sibling_failure(report: &mut ReconcileReport, sibling: &Node, error: &RemoteError) {
    if error.is_not_found() {
        warn!(
            "Sibling {} {} is missing remotely, skipping shift",
            sibling.kind(),
            sibling.local_id
        );
        report.skipped += 1;
    } else {
        warn!(
            "Failed to shift sibling {} {}: {}",
            sibling.kind(),
            sibling.local_id,
            error
        );
        report.failed += 1;
    }
}

/// Fetch the remote counterpart of a linked node. A missing counterpart
/// means the local link is stale, which needs an operator.
pub(crate) async fn fetch_linked(
    remote: &dyn RemoteClient,
    ctx: &SyncContext,
    node: &Node,
    remote_id: i64,
) -> Result<RemoteNode> {
    match remote.get(ctx, node.kind(), remote_id).await {
        Ok(state) => Ok(state),
        Err(e) if e.is_not_found() => Err(SyncError::Inconsistent(format!(
            "{} {} is linked to remote {} which does not exist",
            node.kind(),
            node.local_id,
            remote_id
        ))),
        Err(e) => Err(e.into()),
    }
}
