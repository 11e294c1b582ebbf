//! System-wide metrics aggregation.
//!
//! Runs on a timer (driven by the service facade), refreshing per-provider
//! health scores and the request/cost tally, and pruning out-of-window usage
//! records while it is at it.

use crate::health::HealthTracker;
use crate::registry::ProviderRegistry;
use chrono::{DateTime, Utc};
use common::{AggregatorConfig, RouterResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Read-only system tally, refreshed by `recompute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    /// Spend observed inside the health window, across all providers.
    pub total_cost: f64,
    /// Health score per "provider/model" pair.
    pub provider_health: HashMap<String, f64>,
    pub generated_at: DateTime<Utc>,
}

impl SystemMetrics {
    fn empty() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time_ms: 0.0,
            total_cost: 0.0,
            provider_health: HashMap::new(),
            generated_at: Utc::now(),
        }
    }
}

/// Periodic aggregator over the registry and health tracker.
pub struct MetricsAggregator {
    registry: Arc<ProviderRegistry>,
    tracker: Arc<HealthTracker>,
    current: Arc<RwLock<SystemMetrics>>,
    config: AggregatorConfig,
}

impl MetricsAggregator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        tracker: Arc<HealthTracker>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            current: Arc::new(RwLock::new(SystemMetrics::empty())),
            config,
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        self.config.interval
    }

    /// Latest aggregate, as of the last `recompute`.
    pub async fn current(&self) -> SystemMetrics {
        self.current.read().await.clone()
    }

    /// Recompute the tally and refresh derived health scores.
    pub async fn recompute(&self) -> SystemMetrics {
        // Stale usage records would otherwise linger until the next append.
        self.tracker.sweep().await;

        let snapshot = self.registry.snapshot().await;

        let mut total_requests = 0u64;
        let mut successful = 0u64;
        let mut failed = 0u64;
        let mut weighted_latency = 0.0f64;
        for provider in &snapshot {
            total_requests += provider.metrics.request_count;
            successful += provider.metrics.success_count;
            failed += provider.metrics.failure_count;
            weighted_latency +=
                provider.metrics.average_latency_ms * provider.metrics.request_count as f64;
        }
        let average_response_time_ms = if total_requests > 0 {
            weighted_latency / total_requests as f64
        } else {
            0.0
        };

        let mut provider_health = HashMap::new();
        for provider in &snapshot {
            for model in &provider.models {
                let score = self.tracker.health_score(&provider.name, model).await;
                provider_health.insert(format!("{}/{}", provider.name, model), score);
            }
        }

        let metrics = SystemMetrics {
            total_requests,
            successful_requests: successful,
            failed_requests: failed,
            average_response_time_ms,
            total_cost: self.tracker.total_cost().await,
            provider_health,
            generated_at: Utc::now(),
        };

        {
            let mut current = self.current.write().await;
            *current = metrics.clone();
        }
        debug!(
            total_requests,
            providers = snapshot.len(),
            "system metrics recomputed"
        );
        metrics
    }

    /// Pretty-printed JSON of the current aggregate, for dumps and debugging.
    pub async fn export_json(&self) -> RouterResult<String> {
        let metrics = self.current().await;
        serde_json::to_string_pretty(&metrics)
            .map_err(|e| common::RouterError::Internal(format!("serialize metrics: {e}")))
    }
}
