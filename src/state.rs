//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::store::NodeStore;
use crate::sync::SyncEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    engine: SyncEngine,
}

impl AppState {
    pub fn new(config: Config, engine: SyncEngine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, engine }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the sync engine
    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    /// Get the local node store
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        self.inner.engine.store()
    }
}
