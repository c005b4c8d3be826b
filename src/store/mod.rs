//! Persistence of variable payloads.
//!
//! A [`StoreMap`] is a flat key to payload mapping with one entry per
//! variable. Programs key entries by variable path, optimizers by ordinal.

mod file;
mod memory;

pub use file::FileVariableStore;
pub use memory::MemoryVariableStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::variable::Variable;
use crate::error::StoreError;
use crate::optimizers::Optimizer;
use crate::program::Program;

pub type StoreMap = BTreeMap<String, Value>;

/// Something owning variables that can be written to and read from a store.
pub trait Saveable {
    fn owner_name(&self) -> &str;

    /// Owned variables with their store keys.
    fn keyed_variables(&self) -> Vec<(String, Variable)>;

    fn save_own_variables(&self, store: &mut StoreMap) -> Result<(), StoreError> {
        for (key, variable) in self.keyed_variables() {
            let payload = variable.payload().ok_or_else(|| {
                StoreError::StorageError(format!(
                    "variable `{}` is not initialized",
                    variable.path()
                ))
            })?;
            store.insert(key, payload);
        }
        Ok(())
    }

    /// Load payloads into the owned variables. Returns how many were loaded.
    ///
    /// A store whose entry count differs from the number of owned variables
    /// is treated as holding nothing for this owner.
    fn load_own_variables(&self, store: &StoreMap) -> Result<usize, StoreError> {
        let variables = self.keyed_variables();
        if store.len() != variables.len() {
            tracing::warn!(
                owner = %self.owner_name(),
                expected = variables.len(),
                found = store.len(),
                "store entry count does not match variable count, skipping load"
            );
            return Ok(0);
        }
        let mut staged = Vec::with_capacity(variables.len());
        for (key, variable) in variables {
            let payload = store
                .get(&key)
                .ok_or_else(|| StoreError::Corrupted(format!("missing entry `{}`", key)))?;
            variable
                .schema()
                .validate(payload)
                .map_err(|e| StoreError::Corrupted(format!("{}: {}", key, e)))?;
            staged.push((variable, payload.clone()));
        }
        let count = staged.len();
        for (variable, payload) in staged {
            variable.restore(payload);
        }
        Ok(count)
    }
}

impl Saveable for Program {
    fn owner_name(&self) -> &str {
        self.name()
    }

    fn keyed_variables(&self) -> Vec<(String, Variable)> {
        self.variables()
            .iter()
            .map(|v| (v.path().to_string(), v.clone()))
            .collect()
    }
}

impl Saveable for dyn Optimizer {
    fn owner_name(&self) -> &str {
        self.state().name()
    }

    fn keyed_variables(&self) -> Vec<(String, Variable)> {
        self.variables()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()
    }
}

/// Where store maps are kept, keyed by owner name.
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn save(&self, key: &str, store: &StoreMap) -> Result<(), StoreError>;
    async fn load(&self, key: &str) -> Result<Option<StoreMap>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Save `owner` under its own name.
pub async fn save_to(owner: &(impl Saveable + ?Sized), store: &dyn VariableStore) -> Result<(), StoreError> {
    let mut map = StoreMap::new();
    owner.save_own_variables(&mut map)?;
    store.save(owner.owner_name(), &map).await
}

/// Load `owner` from its own name. Returns how many variables were restored.
pub async fn load_from(owner: &(impl Saveable + ?Sized), store: &dyn VariableStore) -> Result<usize, StoreError> {
    match store.load(owner.owner_name()).await? {
        Some(map) => owner.load_own_variables(&map),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::CallContext;
    use crate::optimizers::RandomFewShot;
    use serde_json::json;

    #[test]
    fn test_optimizer_keys_are_ordinals() {
        let optimizer: Box<dyn Optimizer> = Box::new(RandomFewShot::with_seed(1, 1, 0).unwrap());
        let mut map = StoreMap::new();
        optimizer.save_own_variables(&mut map).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["0"]);
        assert_eq!(map["0"], json!({"iteration": 0}));
    }

    #[tokio::test]
    async fn test_count_mismatch_loads_nothing() {
        let optimizer: Box<dyn Optimizer> = Box::new(RandomFewShot::with_seed(1, 1, 0).unwrap());
        let ctx = CallContext::new();
        optimizer.apply_optimization(&[], 1.0, &ctx).await.unwrap();

        let mut map = StoreMap::new();
        map.insert("0".into(), json!({"iteration": 9}));
        map.insert("1".into(), json!({"iteration": 9}));
        assert_eq!(optimizer.load_own_variables(&map).unwrap(), 0);
        assert_eq!(optimizer.state().iterations(&ctx).unwrap(), 1);

        map.remove("1");
        assert_eq!(optimizer.load_own_variables(&map).unwrap(), 1);
        assert_eq!(optimizer.state().iterations(&ctx).unwrap(), 9);
    }

    #[test]
    fn test_invalid_payload_is_corrupted() {
        let optimizer: Box<dyn Optimizer> = Box::new(RandomFewShot::with_seed(1, 1, 0).unwrap());
        let mut map = StoreMap::new();
        map.insert("0".into(), json!({"iteration": "many"}));
        assert!(matches!(
            optimizer.load_own_variables(&map),
            Err(StoreError::Corrupted(_))
        ));
    }
}
