pub mod utils;
pub mod stats;
pub mod models;
pub mod error;
pub mod db;
pub mod faces;
pub mod api;

use std::sync::Arc;

use crate::db::Db;
use crate::faces::batch::BatchController;
use crate::faces::cluster::ClusterManager;
use crate::faces::prototype::PrototypeEngine;
use crate::faces::search::SimilaritySearch;
use crate::faces::settings::SettingsStore;
use crate::faces::store::{build_store, EmbeddingStore};
use crate::utils::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub config: Config,
    pub stats: Arc<stats::Stats>,
    pub db: Db,
    pub store: Arc<dyn EmbeddingStore>,
    pub settings: SettingsStore,
    pub search: SimilaritySearch,
    pub cluster: ClusterManager,
    pub batch: BatchController,
}

impl AppState {
    /// Wires the engine over an open database. Call [`AppState::recover`]
    /// once before serving to pick up jobs left running by a previous process.
    pub fn new(config: Config, db: Db, stats: Arc<stats::Stats>) -> Self {
        let store = build_store(config.search_backend, db.clone());
        let settings = SettingsStore::new(db.clone(), &config.cluster);
        let prototypes = PrototypeEngine::new(db.clone(), config.cluster.prototype_sample, stats.clone());
        let search = SimilaritySearch::new(db.clone(), store.clone(), settings.clone(), stats.clone());
        let cluster = ClusterManager::new(
            db.clone(),
            store.clone(),
            prototypes,
            settings.clone(),
            config.cluster.clone(),
            stats.clone(),
        );
        let batch = BatchController::new(
            db.clone(),
            store.clone(),
            cluster.clone(),
            settings.clone(),
            config.cluster.clone(),
            stats.clone(),
        );
        Self {
            started_at: std::time::Instant::now(),
            config,
            stats,
            db,
            store,
            settings,
            search,
            cluster,
            batch,
        }
    }

    pub async fn recover(&self) -> error::Result<usize> {
        self.batch.recover().await
    }
}
