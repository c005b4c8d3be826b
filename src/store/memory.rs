use std::collections::HashMap;

use async_trait::async_trait;

use super::{StoreMap, VariableStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryVariableStore {
    data: tokio::sync::RwLock<HashMap<String, StoreMap>>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn save(&self, key: &str, store: &StoreMap) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), store.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<StoreMap>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}
