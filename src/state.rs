//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::sync::SyncCoordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: SyncCoordinator,
}

impl AppState {
    pub fn new(config: Config, coordinator: SyncCoordinator) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the sync coordinator
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }
}
