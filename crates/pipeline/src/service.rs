//! Embeddable routing service.
//!
//! Wires the full subsystem together, owns the background tasks (cache
//! sweeper, usage-window sweeper, metrics aggregator, request pruner), and
//! exposes the operations a transport layer binds 1:1 onto routes: process,
//! request lookup, providers listing, system metrics, registry refresh, and
//! runtime weight updates.

use crate::contracts::Executor;
use crate::orchestrator::PipelineOrchestrator;
use crate::request::{ProcessInput, RouteRequest};
use common::{RouterConfig, RouterResult, SelectionWeights};
use routing::{
    FeedbackLearner, HealthTracker, MetricsAggregator, MetricsSink, PromptOptimizer, Provider,
    ProviderRegistry, ProviderSource, RateLimitState, ScoringSelector, SystemMetrics,
    TaskClassifier, WeightUpdate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// One provider plus its live health and limiter state, as returned by the
/// providers listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    /// Health score per model.
    pub health_scores: HashMap<String, f64>,
    /// Limiter state per model, where one exists.
    pub rate_limits: HashMap<String, RateLimitState>,
}

pub struct RouterService {
    registry: Arc<ProviderRegistry>,
    tracker: Arc<HealthTracker>,
    optimizer: Arc<PromptOptimizer>,
    selector: Arc<ScoringSelector>,
    aggregator: Arc<MetricsAggregator>,
    orchestrator: Arc<PipelineOrchestrator>,
    source: Arc<dyn ProviderSource>,
    config: RouterConfig,
    shutdown: CancellationToken,
}

impl RouterService {
    /// Build the service and perform the initial registry load.
    pub async fn new(
        config: RouterConfig,
        source: Arc<dyn ProviderSource>,
        executor: Arc<dyn Executor>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> RouterResult<Self> {
        config.validate()?;

        let registry = Arc::new(ProviderRegistry::new());
        let records = source
            .load()
            .await
            .map_err(|e| common::RouterError::Configuration(format!("provider source: {e}")))?;
        let loaded = registry.reload(records).await?;
        info!(providers = loaded, "router service initialized");

        let tracker = Arc::new(HealthTracker::new(config.health.clone()));
        let optimizer = Arc::new(PromptOptimizer::new(config.spo.clone()));
        let selector = Arc::new(ScoringSelector::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            config.selector.clone(),
        ));
        let learner = Arc::new(FeedbackLearner::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            sink.clone(),
            config.learner.clone(),
        ));
        let aggregator = Arc::new(MetricsAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            config.aggregator.clone(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::new(TaskClassifier::new()),
            Arc::clone(&optimizer),
            Arc::clone(&selector),
            learner,
            Arc::clone(&tracker),
            executor,
            sink,
            config.orchestrator.clone(),
        ));

        Ok(Self {
            registry,
            tracker,
            optimizer,
            selector,
            aggregator,
            orchestrator,
            source,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the background tasks. Idempotent enough for one call at startup;
    /// all tasks stop on `shutdown()`.
    pub fn start(&self) {
        info!("starting router service background tasks");

        let optimizer = Arc::clone(&self.optimizer);
        spawn_periodic(
            "cache-sweeper",
            self.config.spo.sweeper_interval,
            self.shutdown.clone(),
            move || {
                let optimizer = Arc::clone(&optimizer);
                async move {
                    optimizer.sweep().await;
                }
            },
        );

        let tracker = Arc::clone(&self.tracker);
        spawn_periodic(
            "usage-sweeper",
            self.config.health.sweeper_interval,
            self.shutdown.clone(),
            move || {
                let tracker = Arc::clone(&tracker);
                async move {
                    tracker.sweep().await;
                }
            },
        );

        let aggregator = Arc::clone(&self.aggregator);
        spawn_periodic(
            "aggregator",
            self.aggregator.interval(),
            self.shutdown.clone(),
            move || {
                let aggregator = Arc::clone(&aggregator);
                async move {
                    aggregator.recompute().await;
                }
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        spawn_periodic(
            "request-pruner",
            self.config.orchestrator.prune_interval,
            self.shutdown.clone(),
            move || {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    orchestrator.prune_completed().await;
                }
            },
        );
    }

    /// Stop all background tasks and cancel in-flight requests.
    pub fn shutdown(&self) {
        info!("router service shutting down");
        self.shutdown.cancel();
    }

    /// Process one request under the service-wide shutdown signal.
    pub async fn process(&self, input: ProcessInput) -> RouteRequest {
        self.process_with_cancel(&self.shutdown.child_token(), input)
            .await
    }

    /// Process one request under a caller-provided cancellation token.
    pub async fn process_with_cancel(
        &self,
        cancel: &CancellationToken,
        input: ProcessInput,
    ) -> RouteRequest {
        self.orchestrator.process(cancel, input).await
    }

    pub async fn request(&self, id: &str) -> Option<RouteRequest> {
        self.orchestrator.get(id).await
    }

    /// Registry snapshot enriched with live health and limiter state.
    pub async fn providers_with_health(&self) -> Vec<ProviderStatus> {
        let snapshot = self.registry.snapshot().await;
        let limits = self.tracker.rate_limit_snapshot().await;

        let mut statuses = Vec::with_capacity(snapshot.len());
        for provider in snapshot {
            let mut health_scores = HashMap::new();
            for model in &provider.models {
                health_scores.insert(
                    model.clone(),
                    self.tracker.health_score(&provider.name, model).await,
                );
            }
            let rate_limits = limits.get(&provider.name).cloned().unwrap_or_default();
            statuses.push(ProviderStatus {
                provider,
                health_scores,
                rate_limits,
            });
        }
        statuses.sort_by(|a, b| a.provider.name.cmp(&b.provider.name));
        statuses
    }

    /// Last aggregate computed by the background aggregator.
    pub async fn system_metrics(&self) -> SystemMetrics {
        self.aggregator.current().await
    }

    /// Recompute the aggregate right now, for callers that cannot wait a tick.
    pub async fn refresh_metrics(&self) -> SystemMetrics {
        self.aggregator.recompute().await
    }

    /// JSON dump of the current aggregate.
    pub async fn system_metrics_json(&self) -> RouterResult<String> {
        self.aggregator.export_json().await
    }

    /// Reload the registry from the provider source.
    pub async fn refresh_registry(&self) -> RouterResult<usize> {
        let records = self.source.load().await.map_err(|e| {
            error!(error = %e, "provider source failed during refresh");
            common::RouterError::Configuration(format!("provider source: {e}"))
        })?;
        self.registry.reload(records).await
    }

    /// Update the selector weights at runtime.
    pub async fn update_weights(&self, update: WeightUpdate) -> RouterResult<SelectionWeights> {
        self.selector.update_weights(update).await
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }
}

/// Run `task` every `interval` until the shutdown token fires.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    shutdown: CancellationToken,
    mut task: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                _ = shutdown.cancelled() => {
                    tracing::debug!(task = name, "background task stopped");
                    break;
                }
            }
        }
    });
}
