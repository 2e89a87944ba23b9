use crate::error::{Result, TransferError};
use crate::model::Position;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::PositionStore;

/// Persists a `Position` as a small JSON record under `data_dir/position.json`,
/// written atomically via a temp-file-then-rename so a crash mid-write never
/// leaves a corrupt or half-written checkpoint on disk.
pub struct FilePositionStore {
    path: PathBuf,
    genesis: Position,
    cache: Arc<RwLock<Option<Position>>>,
}

impl FilePositionStore {
    pub fn new(data_dir: impl Into<PathBuf>, genesis: Position) -> Self {
        Self {
            path: data_dir.into().join("position.json"),
            genesis,
            cache: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            let bytes = std::fs::read(&self.path)?;
            let position: Position = serde_json::from_slice(&bytes)?;
            debug!(?position, "loaded persisted position");
            *self.cache.write() = Some(position);
        } else {
            info!(path = %self.path.display(), "no persisted position, starting from genesis");
        }
        Ok(())
    }

    async fn get(&self) -> Result<Position> {
        Ok(self
            .cache
            .read()
            .clone()
            .unwrap_or_else(|| self.genesis.clone()))
    }

    async fn save(&self, position: Position) -> Result<()> {
        let path = self.path.clone();
        let encoded = serde_json::to_vec(&position)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp_path = path.with_extension("json.tmp");
            {
                let mut tmp = std::fs::File::create(&tmp_path)?;
                tmp.write_all(&encoded)?;
                tmp.sync_all()?;
            }
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| TransferError::PositionPersistFailed(e.to_string()))??;

        *self.cache.write() = Some(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePositionStore::new(dir.path(), Position::genesis());
        store.initialize().await.unwrap();
        assert_eq!(store.get().await.unwrap(), Position::genesis());

        let p = Position::new("mysql-bin.000003", 1024);
        store.save(p.clone()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), p);

        let reopened = FilePositionStore::new(dir.path(), Position::genesis());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get().await.unwrap(), p);
    }

    #[tokio::test]
    async fn falls_back_to_genesis_when_nothing_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = Position::new("mysql-bin.000001", 4);
        let store = FilePositionStore::new(dir.path(), genesis.clone());
        store.initialize().await.unwrap();
        assert_eq!(store.get().await.unwrap(), genesis);
    }
}
