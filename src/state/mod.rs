use std::sync::Arc;

use crate::{config::AppConfig, dao::claim_store::ClaimStore};

/// Handle to the application state shared by every request handler.
pub type SharedState = Arc<AppState>;

/// Central application state: the claim store and the runtime configuration.
pub struct AppState {
    store: Arc<dyn ClaimStore>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(store: Arc<dyn ClaimStore>, config: AppConfig) -> SharedState {
        Arc::new(Self { store, config })
    }

    /// Store holding the canonical list of games.
    pub fn store(&self) -> &Arc<dyn ClaimStore> {
        &self.store
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
