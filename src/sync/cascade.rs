//! Subtree sync and delete
//!
//! Each branch runs as its own task. A parent finishes its own remote work
//! before its children start (sync) or after all of them have joined
//! (delete). On sync the children of one parent are created or updated in
//! position order, then descend in parallel. A failing branch is recorded
//! in the report and never cancels its siblings.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn, Instrument};

use super::challenge::SyncOutcome;
use super::error::{Result, SyncError};
use super::node::NodeSyncServices;
use crate::context::SyncContext;
use crate::store::NodeStore;
use crate::tree::{Node, NodeKind};

/// A node whose creation is waiting for a solved challenge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChallenge {
    pub local_id: i64,
    pub kind: NodeKind,
    pub site_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchFailure {
    pub local_id: i64,
    pub kind: NodeKind,
    pub error: String,
}

/// Aggregate result of a cascade
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CascadeReport {
    pub synced: usize,
    pub deleted: usize,
    pub failed: usize,
    pub challenged: Vec<PendingChallenge>,
    pub failures: Vec<BranchFailure>,
}

impl CascadeReport {
    pub fn merge(&mut self, other: CascadeReport) {
        self.synced += other.synced;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.challenged.extend(other.challenged);
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.challenged.is_empty()
    }

    fn fail(&mut self, local_id: i64, kind: NodeKind, error: impl ToString) {
        self.failed += 1;
        self.failures.push(BranchFailure {
            local_id,
            kind,
            error: error.to_string(),
        });
    }
}

#[derive(Clone)]
pub struct CascadeOrchestrator {
    store: Arc<dyn NodeStore>,
    services: NodeSyncServices,
    permits: Arc<Semaphore>,
}

impl CascadeOrchestrator {
    pub fn new(store: Arc<dyn NodeStore>, services: NodeSyncServices, max_concurrency: usize) -> Self {
        Self {
            store,
            services,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Create or update a node and everything below it, parent before child
    pub async fn sync_subtree(&self, ctx: &SyncContext, root_id: i64) -> Result<CascadeReport> {
        let root = self.load(root_id).await?;
        let report = self.sync_branch(ctx.clone(), root).await;
        debug!("Subtree sync of {} finished: {:?}", root_id, report);
        Ok(report)
    }

    /// Delete a node and everything below it, children before parent
    pub async fn delete_subtree(&self, ctx: &SyncContext, root_id: i64) -> Result<CascadeReport> {
        let root = self.load(root_id).await?;
        let report = self.delete_branch(ctx.clone(), root).await;
        debug!("Subtree delete of {} finished: {:?}", root_id, report);
        Ok(report)
    }

    async fn load(&self, id: i64) -> Result<Node> {
        self.store.get(id).await?.ok_or(SyncError::NotFound(id))
    }

    fn sync_branch(&self, ctx: SyncContext, node: Node) -> BoxFuture<'static, CascadeReport> {
        let this = self.clone();
        let span = tracing::info_span!("sync_branch", kind = %node.kind(), id = node.local_id);

        async move {
            let mut report = CascadeReport::default();
            if this.sync_recorded(&ctx, &node, &mut report).await {
                report.merge(this.sync_children(ctx, node).await);
            }
            report
        }
        .instrument(span)
        .boxed()
    }

    /// Sync the children of an already synced node. Siblings go one after
    /// another in position order so each create sees the remote slots
    /// opened by the ones before it; each synced child then descends as
    /// its own task.
    fn sync_children(&self, ctx: SyncContext, parent: Node) -> BoxFuture<'static, CascadeReport> {
        let this = self.clone();

        async move {
            let mut report = CascadeReport::default();
            let children = match this.store.children(&parent).await {
                Ok(children) => children,
                Err(e) => {
                    report.fail(parent.local_id, parent.kind(), e);
                    return report;
                }
            };

            let mut descend = Vec::with_capacity(children.len());
            for child in children {
                if this.sync_recorded(&ctx, &child, &mut report).await {
                    descend.push(child);
                }
            }

            let branches: Vec<(i64, NodeKind)> =
                descend.iter().map(|c| (c.local_id, c.kind())).collect();
            let handles = descend.into_iter().map(|child| {
                let span =
                    tracing::info_span!("sync_branch", kind = %child.kind(), id = child.local_id);
                tokio::spawn(this.sync_children(ctx.clone(), child).instrument(span))
            });

            for ((local_id, kind), joined) in branches.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok(child_report) => report.merge(child_report),
                    Err(e) => {
                        tracing::error!("Sync task for {} {} died: {}", kind, local_id, e);
                        report.fail(local_id, kind, SyncError::Task(e.to_string()));
                    }
                }
            }

            report
        }
        .boxed()
    }

    /// Sync one node and record the outcome. Returns whether its children
    /// should follow.
    async fn sync_recorded(
        &self,
        ctx: &SyncContext,
        node: &Node,
        report: &mut CascadeReport,
    ) -> bool {
        let kind = node.kind();
        match self.sync_one(ctx, node).await {
            Ok(SyncOutcome::Synced { .. }) => {
                report.synced += 1;
                true
            }
            Ok(SyncOutcome::ChallengeRequired { site_key }) => {
                debug!("Branch stopped at {} {} pending a challenge", kind, node.local_id);
                report.challenged.push(PendingChallenge {
                    local_id: node.local_id,
                    kind,
                    site_key,
                });
                false
            }
            Err(e) => {
                warn!("Failed to sync {} {}: {}", kind, node.local_id, e);
                report.fail(node.local_id, kind, e);
                false
            }
        }
    }

    /// Remote work for one node. Holds a pool permit for its duration only.
    async fn sync_one(&self, ctx: &SyncContext, node: &Node) -> Result<SyncOutcome> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;

        let service = self.services.for_kind(node.kind());
        if node.is_synced() {
            let state = service.update_remote(ctx, node.local_id).await?;
            Ok(SyncOutcome::Synced { node: state })
        } else {
            service.sync_new(ctx, node.local_id, None).await
        }
    }

    fn delete_branch(&self, ctx: SyncContext, node: Node) -> BoxFuture<'static, CascadeReport> {
        let this = self.clone();
        let span = tracing::info_span!("delete_branch", kind = %node.kind(), id = node.local_id);

        async move {
            let mut report = CascadeReport::default();
            let kind = node.kind();

            let children = match this.store.children(&node).await {
                Ok(children) => children,
                Err(e) => {
                    report.fail(node.local_id, kind, e);
                    return report;
                }
            };

            let branches: Vec<(i64, NodeKind)> =
                children.iter().map(|c| (c.local_id, c.kind())).collect();
            let handles = children
                .into_iter()
                .map(|child| tokio::spawn(this.delete_branch(ctx.clone(), child)));

            for ((local_id, kind), joined) in branches.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok(child_report) => report.merge(child_report),
                    Err(e) => {
                        tracing::error!("Delete task for {} {} died: {}", kind, local_id, e);
                        report.fail(local_id, kind, SyncError::Task(e.to_string()));
                    }
                }
            }

            // Keep the node while any descendant survives so no remote
            // child is left without its parent
            if report.failed > 0 {
                warn!(
                    "Keeping {} {}: {} descendants could not be deleted",
                    kind, node.local_id, report.failed
                );
                report.fail(node.local_id, kind, "descendants could not be deleted");
                return report;
            }

            match this.delete_one(&ctx, &node).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete {} {}: {}", kind, node.local_id, e);
                    report.fail(node.local_id, kind, e);
                }
            }

            report
        }
        .instrument(span)
        .boxed()
    }

    async fn delete_one(&self, ctx: &SyncContext, node: &Node) -> Result<()> {
        if !node.is_synced() {
            self.store.remove(node.local_id).await?;
            return Ok(());
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        self.services
            .for_kind(node.kind())
            .delete_remote(ctx, node.local_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::remote::mock::RemoteCall;
    use crate::test_support::{course, lesson, section, step, synced_course_with_sections, Fixture};
    use crate::tree::NewNode;

    /// Course with `sections` sections, each holding two lessons of one
    /// step each. Nothing is synced.
    async fn draft_tree(fx: &Fixture, sections: usize) -> Node {
        let c = fx.insert(None, course("Rust")).await;
        for s in 1..=sections {
            let sec = fx.insert(Some(c.local_id), section(&format!("Section {}", s))).await;
            for l in 1..=2 {
                let les = fx
                    .insert(Some(sec.local_id), lesson(&format!("Lesson {}.{}", s, l)))
                    .await;
                fx.insert(Some(les.local_id), step(&format!("Step {}.{}", s, l)))
                    .await;
            }
        }
        c
    }

    fn orchestrator(fx: &Fixture, max_concurrency: usize) -> CascadeOrchestrator {
        CascadeOrchestrator::new(fx.store.clone(), fx.services(), max_concurrency)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_subtree_creates_parents_first() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 3).await;

        let report = orchestrator(&fx, 4)
            .sync_subtree(&fx.ctx, root.local_id)
            .await
            .unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.synced, 1 + 3 + 6 + 6);

        // Every create names a parent that was created earlier
        let mut created = Vec::new();
        for call in fx.remote.calls() {
            if let RemoteCall::Create {
                parent_id,
                assigned: Some(id),
                ..
            } = call
            {
                if let Some(parent) = parent_id {
                    assert!(created.contains(&parent), "child created before parent {}", parent);
                }
                created.push(id);
            }
        }
        assert_eq!(created.len(), 16);

        fx.assert_mirrored(root.local_id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failing_branch_is_isolated() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 5).await;
        fx.remote.fail_label("Section 3");

        let report = orchestrator(&fx, 8)
            .sync_subtree(&fx.ctx, root.local_id)
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, NodeKind::Section);
        // Course, four sections and their lessons and steps
        assert_eq!(report.synced, 1 + 4 + 8 + 8);

        let sections = fx
            .store
            .find_siblings_ordered(NodeKind::Section, Some(root.local_id))
            .await
            .unwrap();
        let linked: Vec<bool> = sections.iter().map(Node::is_synced).collect();
        assert_eq!(linked, vec![true, true, false, true, true]);

        let lessons = fx.store.children(&sections[2]).await.unwrap();
        assert!(lessons.iter().all(|l| !l.is_synced()));
    }

    #[tokio::test]
    async fn test_challenge_stops_branch() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 2).await;
        fx.remote.require_challenge("site-key", "solved");

        let report = orchestrator(&fx, 2)
            .sync_subtree(&fx.ctx, root.local_id)
            .await
            .unwrap();

        assert_eq!(report.synced, 0);
        assert_eq!(
            report.challenged,
            vec![PendingChallenge {
                local_id: root.local_id,
                kind: NodeKind::Course,
                site_key: "site-key".to_string()
            }]
        );
        assert!(fx.store.children(&root).await.unwrap().iter().all(|s| !s.is_synced()));
    }

    #[tokio::test]
    async fn test_resync_updates_existing_nodes() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 2).await;
        let cascade = orchestrator(&fx, 2);

        cascade.sync_subtree(&fx.ctx, root.local_id).await.unwrap();
        fx.remote.clear_calls();
        let report = cascade.sync_subtree(&fx.ctx, root.local_id).await.unwrap();

        assert_eq!(report.synced, 11);
        assert!(!fx
            .remote
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::Create { .. })));
        assert_eq!(fx.remote.update_count(), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_subtree_after_insert_at_front() {
        let fx = Fixture::new().await;
        let (c, _) = synced_course_with_sections(&fx, 3).await;
        fx.store
            .insert(NewNode::at(Some(c.local_id), 1, section("Front")))
            .await
            .unwrap();

        let report = orchestrator(&fx, 4)
            .sync_subtree(&fx.ctx, c.local_id)
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.synced, 5);
        fx.assert_mirrored(c.local_id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_subtree_after_inserts_between_synced() {
        let fx = Fixture::new().await;
        let (c, _) = synced_course_with_sections(&fx, 3).await;
        for position in [1, 3] {
            fx.store
                .insert(NewNode::at(Some(c.local_id), position, section("Inserted")))
                .await
                .unwrap();
        }

        let report = orchestrator(&fx, 4)
            .sync_subtree(&fx.ctx, c.local_id)
            .await
            .unwrap();

        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.synced, 6);
        fx.assert_mirrored(c.local_id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_subtree_is_leaf_first() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 3).await;
        let cascade = orchestrator(&fx, 4);
        cascade.sync_subtree(&fx.ctx, root.local_id).await.unwrap();

        // remote id -> remote parent id, captured before anything is deleted
        let mut parents = HashMap::new();
        for call in fx.remote.calls() {
            if let RemoteCall::Create {
                parent_id,
                assigned: Some(id),
                ..
            } = call
            {
                parents.insert(id, parent_id);
            }
        }
        fx.remote.clear_calls();

        let report = cascade.delete_subtree(&fx.ctx, root.local_id).await.unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.deleted, 16);

        let deleted: Vec<i64> = fx
            .remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Delete { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(deleted.len(), 16);
        for (i, id) in deleted.iter().enumerate() {
            // No node is deleted before any of its children
            let later_children = deleted[i + 1..]
                .iter()
                .filter(|other| parents.get(*other) == Some(&Some(*id)))
                .count();
            assert_eq!(later_children, 0, "remote {} deleted before its children", id);
        }
        assert_eq!(deleted.last(), root_remote_id(&parents).as_ref());
        assert!(fx.store.get(root.local_id).await.unwrap().is_none());
    }

    fn root_remote_id(parents: &HashMap<i64, Option<i64>>) -> Option<i64> {
        parents
            .iter()
            .find(|(_, parent)| parent.is_none())
            .map(|(id, _)| *id)
    }

    #[tokio::test]
    async fn test_delete_subtree_keeps_parent_of_failed_child() {
        let fx = Fixture::new().await;
        let (c, sections) = synced_course_with_sections(&fx, 3).await;
        let stuck = fx.store.get(sections[1]).await.unwrap().unwrap();
        fx.remote.fail_id(stuck.remote_id.unwrap());

        let report = orchestrator(&fx, 2)
            .delete_subtree(&fx.ctx, c.local_id)
            .await
            .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 2);
        let stored = fx.store.get(c.local_id).await.unwrap().unwrap();
        assert!(fx.remote.node(stored.remote_id.unwrap()).is_some());
        assert!(fx.store.get(sections[1]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_subtree_drops_unsynced_locally() {
        let fx = Fixture::new().await;
        let root = draft_tree(&fx, 2).await;

        let report = orchestrator(&fx, 2)
            .delete_subtree(&fx.ctx, root.local_id)
            .await
            .unwrap();

        assert_eq!(report.deleted, 11);
        assert!(fx.remote.calls().is_empty());
        assert!(fx.store.get(root.local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_root() {
        let fx = Fixture::new().await;
        let result = orchestrator(&fx, 1).sync_subtree(&fx.ctx, 77).await;
        assert!(matches!(result, Err(SyncError::NotFound(77))));
    }
}
