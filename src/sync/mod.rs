//! Synchronization between the local content tree and the remote platform
//!
//! - [`PositionReconciler`] keeps sibling positions aligned on both sides
//! - [`NodeSyncService`] creates, updates and deletes single nodes
//! - [`CascadeOrchestrator`] walks whole subtrees with concurrent branches
//! - [`RemoteTreeBuilder`] pulls a remote subtree into the local store
//!
//! [`SyncEngine`] bundles them for the HTTP layer.

mod cascade;
mod challenge;
mod engine;
mod error;
mod node;
mod pull;
mod reconciler;

pub use cascade::{BranchFailure, CascadeOrchestrator, CascadeReport, PendingChallenge};
pub use challenge::{ChallengeTokens, CreateOutcome, SyncOutcome};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use node::{NodeSyncService, NodeSyncServices};
pub use pull::{PullReport, RemoteTreeBuilder};
pub use reconciler::{PositionReconciler, ReconcileReport};
