// persistence/mod.rs - Checkpoint Persistence
//
//! Durable actor checkpoints
//!
//! One [`Checkpoint`] per actor, keyed by actor name. Checkpoints are written
//! on every pause and stop and read once when an actor starts.
//!
//! # Example
//!
//! ```ignore
//! use swarm_coordination::persistence::{PersistenceConfig, PersistenceManager};
//!
//! let manager = PersistenceManager::new(PersistenceConfig::default()).await?;
//! manager.save(&checkpoint).await?;
//! let restored = manager.load("miner").await?;
//! ```

pub mod storage;

pub use storage::{CheckpointStore, FileStorage, MemoryStorage, StorageError};

use crate::lifecycle::Checkpoint;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Storage backend types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    /// In-memory storage (for testing)
    Memory,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,

    /// Directory holding one JSON file per actor
    pub storage_path: PathBuf,

    pub backend: StorageBackend,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: PathBuf::from("./data/checkpoints"),
            backend: StorageBackend::File,
        }
    }
}

impl PersistenceConfig {
    /// Create a memory-only configuration (for testing)
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Default::default()
        }
    }

    /// File storage rooted at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: path.into(),
            ..Default::default()
        }
    }

    /// Disable persistence
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Entry point for checkpoint persistence
///
/// When disabled, saves are skipped and loads find nothing.
#[derive(Clone)]
pub struct PersistenceManager {
    config: PersistenceConfig,
    storage: Arc<dyn CheckpointStore>,
}

impl PersistenceManager {
    pub async fn new(config: PersistenceConfig) -> Result<Self, StorageError> {
        let storage: Arc<dyn CheckpointStore> = match config.backend {
            StorageBackend::File => {
                if config.enabled {
                    tokio::fs::create_dir_all(&config.storage_path).await?;
                }
                Arc::new(FileStorage::new(config.storage_path.clone()))
            }
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };

        Ok(Self { config, storage })
    }

    /// Wrap an existing store
    pub fn with_store(storage: Arc<dyn CheckpointStore>) -> Self {
        Self {
            config: PersistenceConfig::default(),
            storage,
        }
    }

    /// In-memory manager (for testing)
    pub fn in_memory() -> Self {
        Self {
            config: PersistenceConfig::memory(),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        if !self.config.enabled {
            debug!(actor = %checkpoint.actor, "Persistence disabled, checkpoint skipped");
            return Ok(());
        }
        self.storage.save(checkpoint).await
    }

    pub async fn load(&self, actor: &str) -> Result<Option<Checkpoint>, StorageError> {
        if !self.config.enabled {
            return Ok(None);
        }
        self.storage.load(actor).await
    }

    pub async fn delete(&self, actor: &str) -> Result<bool, StorageError> {
        if !self.config.enabled {
            return Ok(false);
        }
        self.storage.delete(actor).await
    }

    pub async fn list_actors(&self) -> Result<Vec<String>, StorageError> {
        if !self.config.enabled {
            return Ok(vec![]);
        }
        self.storage.list_actors().await
    }
}
