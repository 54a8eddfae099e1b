use crate::cache::BundleStore;
use crate::domain::recommendation::{BundleKey, RecommendationBundle};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store. Bundles are replaced whole under the write lock.
#[derive(Debug, Default)]
pub struct MemoryBundleStore {
    bundles: RwLock<HashMap<BundleKey, RecommendationBundle>>,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.bundles.read().await.len()
    }
}

#[async_trait::async_trait]
impl BundleStore for MemoryBundleStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &BundleKey) -> anyhow::Result<Option<RecommendationBundle>> {
        Ok(self.bundles.read().await.get(key).cloned())
    }

    async fn persist(&self, bundle: &RecommendationBundle) -> anyhow::Result<()> {
        self.bundles
            .write()
            .await
            .insert(bundle.key(), bundle.clone());
        Ok(())
    }
}
