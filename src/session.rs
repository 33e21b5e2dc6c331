use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::flows::FlowCache;
use crate::flows::loader::GraphLoader;
use crate::flows::reconciler::SaveEngine;
use crate::flows::registry::FlowRegistry;
use crate::store::pocketbase::PocketBaseStore;
use crate::store::{RecordStore, StoreError};

/// The loader, save engine and registry for one store, sharing one cache.
pub struct FlowSession {
    pub cache: Arc<FlowCache>,
    pub loader: GraphLoader,
    pub engine: SaveEngine,
    pub registry: FlowRegistry,
}

impl FlowSession {
    pub fn new(store: Arc<dyn RecordStore>, config: &Config) -> Self {
        let cache = Arc::new(FlowCache::new(config.cache_ttl));
        Self {
            loader: GraphLoader::new(store.clone(), cache.clone()),
            engine: SaveEngine::new(store.clone(), cache.clone()),
            registry: FlowRegistry::new(store, cache.clone()),
            cache,
        }
    }

    /// Session backed by the PocketBase instance named in `config`.
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(store_url = %config.store_url, "Connecting to record store");
        let store = PocketBaseStore::new(client, &config.store_url, config.auth_token.clone());
        Ok(Self::new(Arc::new(store), config))
    }
}
