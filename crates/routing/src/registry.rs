//! Provider Registry - thread-safe provider storage with atomic reload.

use crate::providers::{Provider, ProviderMetrics, ProviderRecord};
use async_trait::async_trait;
use common::{RouterError, RouterResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Source of inventory records for `reload()`. Implemented by the external
/// CSV/YAML loaders; tests plug in an in-memory list.
#[async_trait]
pub trait ProviderSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<ProviderRecord>>;
}

/// Fixed in-memory source, mostly for tests and embedded setups.
pub struct StaticSource {
    records: Vec<ProviderRecord>,
}

impl StaticSource {
    pub fn new(records: Vec<ProviderRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ProviderSource for StaticSource {
    async fn load(&self) -> anyhow::Result<Vec<ProviderRecord>> {
        Ok(self.records.clone())
    }
}

/// Authoritative set of `Provider` records.
///
/// Readers get point-in-time clones; the only mutation paths are the learner's
/// metric updates (single writer) and the atomic bulk `reload()`.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Atomically replace the full provider set.
    ///
    /// Invalid records (empty name, no models, duplicate name) are skipped
    /// with a warning; the swap happens in one writer critical section so
    /// readers observe either the complete old set or the complete new set.
    pub async fn reload(&self, records: Vec<ProviderRecord>) -> RouterResult<usize> {
        let mut next: HashMap<String, Provider> = HashMap::with_capacity(records.len());

        for record in records {
            if record.name.trim().is_empty() {
                warn!("skipping provider record with empty name");
                continue;
            }
            if record.models.is_empty() {
                warn!(provider = %record.name, "skipping provider record with no models");
                continue;
            }
            if next.contains_key(&record.name) {
                warn!(provider = %record.name, "skipping duplicate provider record");
                continue;
            }
            let provider = Provider::from_record(record);
            next.insert(provider.name.clone(), provider);
        }

        if next.is_empty() {
            return Err(RouterError::Configuration(
                "registry reload produced no valid providers".to_string(),
            ));
        }

        let count = next.len();
        {
            let mut providers = self.providers.write().await;
            *providers = next;
        }
        info!(providers = count, "registry reloaded");
        Ok(count)
    }

    /// Point-in-time clone of every provider.
    pub async fn snapshot(&self) -> Vec<Provider> {
        let providers = self.providers.read().await;
        providers.values().cloned().collect()
    }

    pub async fn by_name(&self, name: &str) -> Option<Provider> {
        let providers = self.providers.read().await;
        providers.get(name).cloned()
    }

    /// Providers whose model list contains `model`.
    pub async fn by_model(&self, model: &str) -> Vec<Provider> {
        let providers = self.providers.read().await;
        providers
            .values()
            .filter(|p| p.has_model(model))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Mutate one provider's metrics under the writer lock.
    ///
    /// This is the single writer path for metrics; the critical section is
    /// only as long as the closure.
    pub async fn update_metrics<F>(&self, name: &str, update: F) -> RouterResult<ProviderMetrics>
    where
        F: FnOnce(&mut ProviderMetrics),
    {
        let mut providers = self.providers.write().await;
        match providers.get_mut(name) {
            Some(provider) => {
                update(&mut provider.metrics);
                debug!(provider = name, "provider metrics updated");
                Ok(provider.metrics.clone())
            }
            None => Err(RouterError::NotFound(format!("provider {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderTier;

    fn sample_records() -> Vec<ProviderRecord> {
        vec![
            ProviderRecord::new("OpenAI", ProviderTier::Official, "https://api.openai.com", &[
                "gpt-4o",
                "gpt-4o-mini",
            ]),
            ProviderRecord::new(
                "Pollinations",
                ProviderTier::Community,
                "https://text.pollinations.ai",
                &["openai"],
            ),
            ProviderRecord::new("LocalLlama", ProviderTier::Unofficial, "http://localhost:8080", &[
                "llama-3.1-8b",
            ]),
        ]
    }

    #[tokio::test]
    async fn test_reload_and_accessors() {
        let registry = ProviderRegistry::new();
        let count = registry.reload(sample_records()).await.unwrap();
        assert_eq!(count, 3);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 3);

        let openai = registry.by_name("OpenAI").await.unwrap();
        assert_eq!(openai.tier, ProviderTier::Official);

        let by_model = registry.by_model("openai").await;
        assert_eq!(by_model.len(), 1);
        assert_eq!(by_model[0].name, "Pollinations");

        assert!(registry.by_name("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_reload_skips_invalid_records() {
        let registry = ProviderRegistry::new();
        let mut records = sample_records();
        records.push(ProviderRecord::new("", ProviderTier::Community, "https://x", &["m"]));
        records.push(ProviderRecord::new("NoModels", ProviderTier::Community, "https://x", &[]));
        records.push(ProviderRecord::new(
            "OpenAI",
            ProviderTier::Community,
            "https://dup",
            &["m"],
        ));

        let count = registry.reload(records).await.unwrap();
        assert_eq!(count, 3);
        // The duplicate kept the first record's tier.
        let openai = registry.by_name("OpenAI").await.unwrap();
        assert_eq!(openai.tier, ProviderTier::Official);
    }

    #[tokio::test]
    async fn test_reload_replaces_atomically() {
        let registry = ProviderRegistry::new();
        registry.reload(sample_records()).await.unwrap();

        let replacement = vec![ProviderRecord::new(
            "Groq",
            ProviderTier::Community,
            "https://api.groq.com",
            &["llama-3.1-70b"],
        )];
        registry.reload(replacement).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert!(registry.by_name("OpenAI").await.is_none());
        assert!(registry.by_name("Groq").await.is_some());
    }

    #[tokio::test]
    async fn test_empty_reload_is_rejected() {
        let registry = ProviderRegistry::new();
        registry.reload(sample_records()).await.unwrap();

        let err = registry.reload(vec![]).await;
        assert!(err.is_err());
        // The previous set survives a failed reload.
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_update_metrics_single_writer() {
        let registry = ProviderRegistry::new();
        registry.reload(sample_records()).await.unwrap();

        let updated = registry
            .update_metrics("OpenAI", |metrics| {
                metrics.request_count += 1;
                metrics.success_count += 1;
            })
            .await
            .unwrap();
        assert_eq!(updated.request_count, 1);

        let err = registry.update_metrics("missing", |_| {}).await;
        assert!(matches!(err, Err(RouterError::NotFound(_))));
    }
}
