//! Relay registry implementation
//!
//! Maps each source to its supervisor. Entries are created on first demand
//! and never removed; only the supervisor's process comes and goes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::RelayConfig;

use super::key::SourceKey;
use super::supervisor::{SourceStats, SourceSupervisor};

/// Registry of all sources known to the relay
///
/// Thread-safe via `RwLock`. After the first connection per source every
/// lookup takes the read path.
pub struct RelayRegistry {
    /// Map of source key to supervisor
    sources: RwLock<HashMap<SourceKey, Arc<SourceSupervisor>>>,

    /// Configuration shared with every supervisor
    config: Arc<RelayConfig>,
}

impl RelayRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config: Arc::new(config),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the supervisor for a source, creating it if needed
    pub async fn get_or_create(&self, key: &SourceKey) -> Arc<SourceSupervisor> {
        if let Some(supervisor) = self.sources.read().await.get(key) {
            return Arc::clone(supervisor);
        }

        let mut sources = self.sources.write().await;
        let supervisor = sources.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(source = %key, "Supervisor created");
            Arc::new(SourceSupervisor::new(key.clone(), Arc::clone(&self.config)))
        });

        Arc::clone(supervisor)
    }

    /// Get the supervisor for a source if it exists
    pub async fn get(&self, key: &SourceKey) -> Option<Arc<SourceSupervisor>> {
        self.sources.read().await.get(key).cloned()
    }

    /// Get statistics for a source
    pub async fn get_source_stats(&self, key: &SourceKey) -> Option<SourceStats> {
        let supervisor = self.get(key).await?;
        Some(supervisor.stats().await)
    }

    /// Check if a source currently has a running transcoder
    pub async fn has_live_process(&self, key: &SourceKey) -> bool {
        match self.get(key).await {
            Some(supervisor) => supervisor.is_live().await,
            None => false,
        }
    }

    /// Get all known source keys
    pub async fn keys(&self) -> Vec<SourceKey> {
        self.sources.read().await.keys().cloned().collect()
    }

    /// Get total number of sources
    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    /// Check if no source has been requested yet
    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}
