//! Feedback learner: folds observed outcomes back into provider metrics.
//!
//! Every statistic is an exponential moving average with a configurable
//! adaptation rate, so a single bad request nudges rather than overwrites a
//! provider's standing. The first observation seeds the averages directly.

use crate::health::{HealthTracker, UsageRecord};
use crate::registry::ProviderRegistry;
use crate::sink::MetricsSink;
use chrono::Utc;
use common::{LearnerConfig, RouterResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Observed result of one executed request.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub cost: f64,
    pub latency_ms: f64,
    /// Heuristic quality in [0, 1]; zero means "no signal", which skips the
    /// quality update.
    pub quality: f64,
    pub success: bool,
    pub rate_limited: bool,
    pub tokens_used: u64,
}

impl Outcome {
    pub fn success(cost: f64, latency_ms: f64, quality: f64, tokens_used: u64) -> Self {
        Self {
            cost,
            latency_ms,
            quality,
            success: true,
            rate_limited: false,
            tokens_used,
        }
    }

    pub fn failure(latency_ms: f64, rate_limited: bool) -> Self {
        Self {
            cost: 0.0,
            latency_ms,
            quality: 0.0,
            success: false,
            rate_limited,
            tokens_used: 0,
        }
    }
}

/// The single writer of provider metrics.
pub struct FeedbackLearner {
    registry: Arc<ProviderRegistry>,
    tracker: Arc<HealthTracker>,
    sink: Option<Arc<dyn MetricsSink>>,
    config: LearnerConfig,
}

impl FeedbackLearner {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        tracker: Arc<HealthTracker>,
        sink: Option<Arc<dyn MetricsSink>>,
        config: LearnerConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            sink,
            config,
        }
    }

    /// Fold one outcome into the provider's metrics and the usage window.
    pub async fn record_outcome(
        &self,
        task_id: &str,
        provider: &str,
        model: &str,
        outcome: &Outcome,
    ) -> RouterResult<()> {
        let alpha = self.config.adaptation_rate;
        let observed_success = if outcome.success { 1.0 } else { 0.0 };

        self.registry
            .update_metrics(provider, |metrics| {
                metrics.request_count += 1;
                if outcome.success {
                    metrics.success_count += 1;
                } else {
                    metrics.failure_count += 1;
                }

                if metrics.request_count == 1 {
                    metrics.success_rate = observed_success;
                    metrics.average_latency_ms = outcome.latency_ms;
                    metrics.average_cost = outcome.cost;
                    if outcome.quality > 0.0 {
                        metrics.quality_score = outcome.quality;
                    }
                } else {
                    metrics.success_rate =
                        alpha * observed_success + (1.0 - alpha) * metrics.success_rate;
                    metrics.average_latency_ms =
                        alpha * outcome.latency_ms + (1.0 - alpha) * metrics.average_latency_ms;
                    metrics.average_cost =
                        alpha * outcome.cost + (1.0 - alpha) * metrics.average_cost;
                    if outcome.quality > 0.0 {
                        metrics.quality_score =
                            alpha * outcome.quality + (1.0 - alpha) * metrics.quality_score;
                    }
                }

                metrics.cost_efficiency = metrics.quality_score / (metrics.average_cost + 1e-3);
                metrics.reliability_score = 0.7 * metrics.success_rate
                    + 0.3 * (1.0 - (metrics.average_latency_ms / 5000.0).min(1.0));
                metrics.last_updated = Some(Utc::now());
            })
            .await?;

        let record = UsageRecord {
            timestamp: Utc::now(),
            request_count: 1,
            failure_count: if outcome.success { 0 } else { 1 },
            latency_ms: outcome.latency_ms,
            tokens_used: outcome.tokens_used,
            cost: outcome.cost,
            rate_limited: outcome.rate_limited,
        };
        self.tracker.record_usage(provider, model, record.clone()).await;

        if let Some(sink) = &self.sink {
            if let Err(error) = sink.record_metrics(provider, model, &record).await {
                warn!(task_id, provider, %error, "metrics sink rejected usage record");
            }
        }

        debug!(
            task_id,
            provider,
            model,
            success = outcome.success,
            cost = outcome.cost,
            "outcome recorded"
        );
        Ok(())
    }
}
