//! In-memory `MachineConfigRepository`.

use crate::repo::MachineConfigRepository;
use async_trait::async_trait;
use roast_schema::{HeuristicsConfig, MachineKey, PartialHeuristicsConfig};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryMachineConfigRepository {
    configs: Mutex<HashMap<MachineKey, HeuristicsConfig>>,
}

impl InMemoryMachineConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineConfigRepository for InMemoryMachineConfigRepository {
    async fn get(&self, key: &MachineKey) -> anyhow::Result<Option<HeuristicsConfig>> {
        Ok(self.configs.lock().unwrap().get(key).cloned())
    }

    async fn upsert(
        &self,
        key: &MachineKey,
        partial: &PartialHeuristicsConfig,
        default: &HeuristicsConfig,
    ) -> anyhow::Result<HeuristicsConfig> {
        let mut configs = self.configs.lock().unwrap();
        let base = configs.get(key).cloned().unwrap_or_else(|| default.clone());
        let merged = base.merged_with(partial);
        configs.insert(key.clone(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, key: &MachineKey) -> anyhow::Result<bool> {
        Ok(self.configs.lock().unwrap().remove(key).is_some())
    }
}
