//! Persistence layer for step definitions
//!
//! Backends are plain key/value stores of text blobs; the step store decides
//! what goes in them.

pub mod file;
#[cfg(feature = "sqlite")]
pub mod store;

pub use file::FileStorage;
#[cfg(feature = "sqlite")]
pub use store::SqliteStorage;

use crate::core::config::{StorageConfig, StorageKind};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the blob stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous blob
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the blob under `key`; missing keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryStorage {
    entries: tokio::sync::RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Open the backend described by `config`
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let path = config.resolved_path();
    match config.backend {
        StorageKind::Memory => {
            info!("Using in-memory step storage");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageKind::File => {
            info!("Using file step storage at {}", path.display());
            Ok(Arc::new(FileStorage::new(path)))
        }
        #[cfg(feature = "sqlite")]
        StorageKind::Sqlite => {
            info!("Using SQLite step storage at {}", path.display());
            Ok(Arc::new(SqliteStorage::open(&path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageKind::Sqlite => {
            anyhow::bail!("SQLite storage requires the `sqlite` feature")
        }
    }
}
