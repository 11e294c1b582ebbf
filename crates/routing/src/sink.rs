//! Best-effort metrics export seam.
//!
//! The core never depends on a concrete storage backend; anything satisfying
//! `MetricsSink` can observe learner updates, rate-limit transitions, and
//! routing decisions. Sink errors are logged by callers and never fail a
//! request.

use crate::complexity::ComplexityLevel;
use crate::health::{RateLimitState, UsageRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One routing decision, recorded after execution for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationEvent {
    /// Provider that would have served the request before ranking.
    pub original_provider: String,
    pub selected_provider: String,
    pub estimated_cost: f64,
    pub actual_cost: f64,
    pub tokens: u64,
    pub complexity: ComplexityLevel,
    pub reason: String,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_metrics(
        &self,
        provider: &str,
        model: &str,
        record: &UsageRecord,
    ) -> anyhow::Result<()>;

    async fn update_rate_limit_status(
        &self,
        provider: &str,
        model: &str,
        state: &RateLimitState,
    ) -> anyhow::Result<()>;

    async fn record_optimization(&self, event: &OptimizationEvent) -> anyhow::Result<()>;
}
