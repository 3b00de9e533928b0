//! In-memory remote platform for tests
//!
//! Records every call in order, can be told to fail for specific nodes and
//! can demand a challenge token before creating courses and lessons.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::RemoteClient;
use super::types::{CreateAck, RemoteError, RemoteNode, RemoteWrite};
use crate::context::SyncContext;
use crate::tree::{NodeKind, Payload};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Create {
        kind: NodeKind,
        parent_id: Option<i64>,
        label: String,
        /// Id handed out, `None` when a challenge was returned
        assigned: Option<i64>,
        user_id: i64,
    },
    Update {
        kind: NodeKind,
        id: i64,
        position: i32,
    },
    Get {
        kind: NodeKind,
        id: i64,
    },
    Delete {
        kind: NodeKind,
        id: i64,
    },
    ListChildren {
        kind: NodeKind,
        id: i64,
    },
}

#[derive(Debug, Clone)]
struct Challenge {
    site_key: String,
    accepted_token: String,
    reissued_token: Option<String>,
}

#[derive(Default)]
struct MockState {
    next_id: i64,
    nodes: BTreeMap<i64, RemoteNode>,
    calls: Vec<RemoteCall>,
    failing_ids: HashSet<i64>,
    failing_labels: HashSet<String>,
    challenge: Option<Challenge>,
}

pub struct MockRemote {
    state: Mutex<MockState>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    /// Place a node directly, without recording a call
    pub fn seed(&self, parent_id: Option<i64>, position: i32, payload: Payload) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            RemoteNode {
                id,
                parent_id,
                position,
                payload,
            },
        );
        id
    }

    pub fn node(&self, id: i64) -> Option<RemoteNode> {
        self.state.lock().nodes.get(&id).cloned()
    }

    /// Drop a node behind the sync engine's back
    pub fn forget(&self, id: i64) {
        self.state.lock().nodes.remove(&id);
    }

    /// Set a position directly, without recording a call
    pub fn set_position(&self, id: i64, position: i32) {
        if let Some(node) = self.state.lock().nodes.get_mut(&id) {
            node.position = position;
        }
    }

    pub fn fail_id(&self, id: i64) {
        self.state.lock().failing_ids.insert(id);
    }

    /// Fail any create or update whose payload carries this label
    pub fn fail_label(&self, label: &str) {
        self.state.lock().failing_labels.insert(label.to_string());
    }

    pub fn require_challenge(&self, site_key: &str, accepted_token: &str) {
        self.state.lock().challenge = Some(Challenge {
            site_key: site_key.to_string(),
            accepted_token: accepted_token.to_string(),
            reissued_token: None,
        });
    }

    /// Hand out a reusable token with every challenged create that succeeds
    pub fn reissue_token(&self, token: &str) {
        if let Some(challenge) = self.state.lock().challenge.as_mut() {
            challenge.reissued_token = Some(token.to_string());
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// `(id, position)` of the children of `parent_id`, ordered by position
    pub fn child_positions(&self, parent_id: i64) -> Vec<(i64, i32)> {
        let state = self.state.lock();
        let mut children: Vec<(i64, i32)> = state
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(parent_id))
            .map(|n| (n.id, n.position))
            .collect();
        children.sort_by_key(|&(id, position)| (position, id));
        children
    }

    pub fn update_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RemoteCall::Update { .. }))
            .count()
    }
}

impl MockState {
    fn lookup(&self, kind: NodeKind, id: i64) -> Result<&RemoteNode, RemoteError> {
        match self.nodes.get(&id) {
            Some(node) if node.kind() == kind => Ok(node),
            _ => Err(RemoteError::NotFound { kind, id }),
        }
    }

    fn check_failure(&self, id: Option<i64>, label: &str) -> Result<(), RemoteError> {
        if id.map_or(false, |id| self.failing_ids.contains(&id)) || self.failing_labels.contains(label) {
            return Err(RemoteError::Transient(format!("injected failure for {}", label)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn create(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        write: &RemoteWrite,
        challenge_token: Option<&str>,
    ) -> Result<CreateAck, RemoteError> {
        let mut state = self.state.lock();
        let label = write.payload.label().to_string();
        state.check_failure(None, &label)?;

        if let Some(parent_id) = write.parent_id {
            let parent_kind = kind.parent().ok_or_else(|| RemoteError::Rejected {
                status: 400,
                body: "courses have no parent".to_string(),
            })?;
            state.lookup(parent_kind, parent_id)?;
        }

        if let (true, Some(challenge)) = (kind.may_require_challenge(), state.challenge.clone()) {
            if challenge_token != Some(challenge.accepted_token.as_str()) {
                state.calls.push(RemoteCall::Create {
                    kind,
                    parent_id: write.parent_id,
                    label,
                    assigned: None,
                    user_id: ctx.user_id,
                });
                return Ok(CreateAck {
                    identifier: challenge.site_key,
                    position: None,
                    challenge_token: None,
                });
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            RemoteNode {
                id,
                parent_id: write.parent_id,
                position: write.position,
                payload: write.payload.clone(),
            },
        );
        state.calls.push(RemoteCall::Create {
            kind,
            parent_id: write.parent_id,
            label,
            assigned: Some(id),
            user_id: ctx.user_id,
        });

        let reissued = state
            .challenge
            .as_ref()
            .filter(|_| kind.may_require_challenge())
            .and_then(|c| c.reissued_token.clone());

        Ok(CreateAck {
            identifier: id.to_string(),
            position: Some(write.position),
            challenge_token: reissued,
        })
    }

    async fn update(
        &self,
        _ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
        write: &RemoteWrite,
    ) -> Result<RemoteNode, RemoteError> {
        let mut state = self.state.lock();
        state.check_failure(Some(remote_id), write.payload.label())?;
        state.lookup(kind, remote_id)?;
        state.calls.push(RemoteCall::Update {
            kind,
            id: remote_id,
            position: write.position,
        });

        let node = RemoteNode {
            id: remote_id,
            parent_id: write.parent_id,
            position: write.position,
            payload: write.payload.clone(),
        };
        state.nodes.insert(remote_id, node.clone());
        Ok(node)
    }

    async fn get(
        &self,
        _ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<RemoteNode, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Get { kind, id: remote_id });
        state.lookup(kind, remote_id).cloned()
    }

    async fn delete(
        &self,
        _ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        let label = state.lookup(kind, remote_id)?.payload.label().to_string();
        state.check_failure(Some(remote_id), &label)?;
        state.calls.push(RemoteCall::Delete { kind, id: remote_id });
        state.nodes.remove(&remote_id);
        Ok(())
    }

    async fn list_children(
        &self,
        _ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<Vec<i64>, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::ListChildren { kind, id: remote_id });
        state.lookup(kind, remote_id)?;

        let mut children: Vec<&RemoteNode> = state
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(remote_id))
            .collect();
        children.sort_by_key(|n| (n.position, n.id));
        Ok(children.into_iter().map(|n| n.id).collect())
    }
}
