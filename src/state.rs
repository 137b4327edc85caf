use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::llm::embeddings::{Embedder, HttpEmbedder};
use crate::rebuild::RebuildService;
use crate::store::backup::{BackupStore, JsonBackupStore};
use crate::store::vector::VectorStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub backup: Arc<dyn BackupStore>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    /// Single permit: at most one rebuild runs at a time.
    pub rebuild_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(config.backup_dir())?;
        std::fs::create_dir_all(config.vector_dir())?;

        let backup = JsonBackupStore::open_or_create(&config.backup_dir())?;
        let vectors = VectorStore::open_or_create(&config.vector_dir())?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        let embedder = HttpEmbedder::new(http_client, config.llm.clone());

        Ok(Self::with_components(
            config,
            Arc::new(backup),
            Arc::new(vectors),
            Arc::new(embedder),
        ))
    }

    /// Assemble state from existing stores and embedder.
    pub fn with_components(
        config: Config,
        backup: Arc<dyn BackupStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            backup,
            vectors,
            embedder,
            rebuild_semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn rebuild_service(&self) -> RebuildService {
        RebuildService::new(self.backup.clone(), self.vectors.clone(), self.embedder.clone())
    }
}
