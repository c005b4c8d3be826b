use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{StoreMap, VariableStore};
use crate::error::StoreError;

/// One `<key>.variables.json` file per owner under a directory.
pub struct FileVariableStore {
    dir: PathBuf,
}

impl FileVariableStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.variables.json", key.replace('/', "_")))
    }
}

#[async_trait]
impl VariableStore for FileVariableStore {
    async fn save(&self, key: &str, store: &StoreMap) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(store)?;
        tokio::fs::write(self.path_for(key), bytes)
            .await
            .map_err(|e| StoreError::StorageError(e.to_string()))
    }

    async fn load(&self, key: &str) -> Result<Option<StoreMap>, StoreError> {
        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::StorageError(e.to_string())),
        };
        let store = serde_json::from_slice::<StoreMap>(&bytes)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        Ok(Some(store))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::StorageError(e.to_string())),
        }
    }
}
