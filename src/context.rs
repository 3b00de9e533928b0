//! Explicit request context
//!
//! Remote calls sign requests with the credentials of the acting user. The
//! context is passed as an argument into every remote call and cloned into
//! every spawned cascade task; nothing is read from thread-local state.

use serde::{Deserialize, Serialize};

/// Context carried by every remote-facing operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncContext {
    #[serde(rename = "userId")]
    pub user_id: i64,
}

impl SyncContext {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }
}
