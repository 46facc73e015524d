//! Application state shared across handlers.

use crate::blocking::BlockEngine;
use crate::resolver::Resolver;
use crate::stats::{StatsPublisher, StatsSnapshot};
use crate::tiering::TierManager;
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_provider::{ArchiveFetcher, ProviderRegistry};
use depot_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tokio::sync::watch;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Hot tier, always on local disk.
    pub hot: Arc<FilesystemBackend>,
    /// Cold tier.
    pub cold: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub registry: ProviderRegistry,
    pub resolver: Arc<Resolver>,
    pub blocks: Arc<BlockEngine>,
    pub tiers: Arc<TierManager>,
    pub stats_publisher: Arc<StatsPublisher>,
    /// Latest published statistics.
    pub stats: watch::Receiver<Arc<StatsSnapshot>>,
}

impl AppState {
    /// Wire the engines together over the given stores.
    pub fn new(
        config: AppConfig,
        hot: Arc<FilesystemBackend>,
        cold: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        registry: ProviderRegistry,
        fetcher: ArchiveFetcher,
    ) -> Self {
        let production = config.server.run_mode.is_production();
        let blocks = Arc::new(BlockEngine::new(
            metadata.clone(),
            hot.clone(),
            cold.clone(),
            registry.clone(),
            production,
        ));
        let resolver = Arc::new(Resolver::new(
            metadata.clone(),
            hot.clone(),
            registry.clone(),
            fetcher,
            blocks.clone(),
        ));
        let tiers = Arc::new(TierManager::new(
            metadata.clone(),
            hot.clone(),
            cold.clone(),
            registry.clone(),
            config.tiering.clone(),
            production,
        ));
        let (publisher, stats) = StatsPublisher::new(metadata.clone());

        Self {
            config: Arc::new(config),
            hot,
            cold,
            metadata,
            registry,
            resolver,
            blocks,
            tiers,
            stats_publisher: Arc::new(publisher),
            stats,
        }
    }
}
