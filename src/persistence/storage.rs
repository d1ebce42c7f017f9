// persistence/storage.rs - Checkpoint Storage Backends
//
//! Storage backends for actor checkpoints
//!
//! Provides:
//! - File-based storage (one JSON document per actor)
//! - In-memory storage (for testing)
//! - `CheckpointStore` trait for custom backends

use crate::lifecycle::Checkpoint;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Checkpoint storage backend
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store the checkpoint for `checkpoint.actor`, replacing any previous one
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Load the checkpoint for an actor
    async fn load(&self, actor: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// Delete an actor's checkpoint; returns whether one existed
    async fn delete(&self, actor: &str) -> Result<bool, StorageError>;

    /// Names of all actors with a stored checkpoint
    async fn list_actors(&self) -> Result<Vec<String>, StorageError>;
}

/// File-based storage backend
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checkpoint_file(&self, actor: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", sanitize_filename(actor)))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if !fs::try_exists(&self.base_path).await? {
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    async fn read_checkpoint(path: &Path) -> Result<Checkpoint, StorageError> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for FileStorage {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let filepath = self.checkpoint_file(&checkpoint.actor);
        let tmp_path = filepath.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // Readers never observe a half-written checkpoint
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &filepath).await?;

        debug!(
            actor = %checkpoint.actor,
            state = %checkpoint.state,
            path = ?filepath,
            "Checkpoint saved"
        );

        Ok(())
    }

    async fn load(&self, actor: &str) -> Result<Option<Checkpoint>, StorageError> {
        let filepath = self.checkpoint_file(actor);
        if !fs::try_exists(&filepath).await? {
            return Ok(None);
        }
        Self::read_checkpoint(&filepath).await.map(Some)
    }

    async fn delete(&self, actor: &str) -> Result<bool, StorageError> {
        let filepath = self.checkpoint_file(actor);
        match fs::remove_file(&filepath).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_actors(&self) -> Result<Vec<String>, StorageError> {
        if !fs::try_exists(&self.base_path).await? {
            return Ok(vec![]);
        }

        let mut actors = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // File names are sanitized, so the actor name comes from the content
            match Self::read_checkpoint(&path).await {
                Ok(checkpoint) => actors.push(checkpoint.actor),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable checkpoint"),
            }
        }

        actors.sort();
        Ok(actors)
    }
}

/// In-memory storage backend (for testing)
#[derive(Default)]
pub struct MemoryStorage {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStorage {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.checkpoints
            .write()
            .insert(checkpoint.actor.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, actor: &str) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.checkpoints.read().get(actor).cloned())
    }

    async fn delete(&self, actor: &str) -> Result<bool, StorageError> {
        Ok(self.checkpoints.write().remove(actor).is_some())
    }

    async fn list_actors(&self) -> Result<Vec<String>, StorageError> {
        let mut actors: Vec<String> = self.checkpoints.read().keys().cloned().collect();
        actors.sort();
        Ok(actors)
    }
}

/// Sanitize a filename to be safe for filesystem
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
