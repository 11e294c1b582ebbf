//! Pipeline orchestration: classify, optimize, select, execute, learn.
//!
//! Each `process` call is independent and may run concurrently with any
//! number of others. The orchestrator owns the in-flight request map and the
//! request state machine; a timeout or cancellation between steps marks the
//! request `timeout` and deliberately skips the learner so unrepresentative
//! data never reaches provider metrics.

use crate::contracts::{ExecutionError, Executor};
use crate::request::{ProcessInput, RequestStatus, RouteRequest};
use common::OrchestratorConfig;
use routing::{
    Assignment, Complexity, ComplexityLevel, FeedbackLearner, HealthTracker, MetricsSink,
    OptimizationEvent, Outcome, PromptOptimizer, ScoringSelector, TaskClassifier,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct PipelineOrchestrator {
    classifier: Arc<TaskClassifier>,
    optimizer: Arc<PromptOptimizer>,
    selector: Arc<ScoringSelector>,
    learner: Arc<FeedbackLearner>,
    tracker: Arc<HealthTracker>,
    executor: Arc<dyn Executor>,
    sink: Option<Arc<dyn MetricsSink>>,
    requests: Arc<RwLock<HashMap<String, RouteRequest>>>,
    config: OrchestratorConfig,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Arc<TaskClassifier>,
        optimizer: Arc<PromptOptimizer>,
        selector: Arc<ScoringSelector>,
        learner: Arc<FeedbackLearner>,
        tracker: Arc<HealthTracker>,
        executor: Arc<dyn Executor>,
        sink: Option<Arc<dyn MetricsSink>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            classifier,
            optimizer,
            selector,
            learner,
            tracker,
            executor,
            sink,
            requests: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Run one request through the full pipeline.
    ///
    /// Always returns the terminal `RouteRequest`; step failures are recorded
    /// on it rather than thrown, so the transport layer can hand the record
    /// straight back to the caller.
    pub async fn process(&self, cancel: &CancellationToken, input: ProcessInput) -> RouteRequest {
        let started = Instant::now();
        let mut request = RouteRequest::new(&input);
        self.store(request.clone()).await;
        debug!(id = %request.id, "request registered");

        // Classification.
        if cancel.is_cancelled() {
            return self.finish_timeout(request).await;
        }
        let complexity = match self.classifier.classify(&input.content) {
            Ok(complexity) => complexity,
            Err(error) => return self.finish_failed(request, error.to_string()).await,
        };
        request.complexity = Some(complexity.clone());
        self.store(request.clone()).await;

        // Prompt optimization.
        if cancel.is_cancelled() {
            return self.finish_timeout(request).await;
        }
        let optimized = match self.optimizer.optimize(&input.content, &complexity).await {
            Ok(optimized) => optimized,
            Err(error) => return self.finish_failed(request, error.to_string()).await,
        };
        request.optimized_prompt = Some(optimized.clone());
        self.store(request.clone()).await;

        // Provider selection.
        if cancel.is_cancelled() {
            return self.finish_timeout(request).await;
        }
        let assignment = match self
            .selector
            .select(&request.id, &complexity, &input.requirements)
            .await
        {
            Ok(assignment) => assignment,
            Err(error) => return self.finish_failed(request, error.to_string()).await,
        };
        request.assignment = Some(assignment.clone());
        request.status = RequestStatus::Running;
        self.store(request.clone()).await;

        // Execution, raced against the remaining deadline and the caller's
        // cancellation. No lock is held across this await.
        let remaining = self.config.task_timeout.saturating_sub(started.elapsed());
        let execution_started = Instant::now();
        // Biased so that an already-fired cancellation or deadline always wins
        // over an executor that happens to resolve in the same poll.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(remaining) => None,
            result = self.executor.run(&optimized, &assignment, cancel) => Some(result),
        };
        let latency_ms = execution_started.elapsed().as_millis() as f64;

        match outcome {
            None => self.finish_timeout(request).await,
            Some(Ok(output)) => {
                let quality = Self::quality_score(&output.content, &complexity);
                self.record_outcome(
                    &request.id,
                    &assignment,
                    &Outcome::success(output.cost, latency_ms, quality, output.tokens_used),
                )
                .await;
                self.tracker
                    .update_rate_limit(
                        &assignment.provider_name,
                        &assignment.model,
                        &output.rate_limit_headers,
                    )
                    .await;
                self.mirror_to_sink(&complexity, &assignment, output.cost, output.tokens_used)
                    .await;

                request.result = Some(output.content);
                request.cost = output.cost;
                request.finish(RequestStatus::Completed);
                self.store(request.clone()).await;
                info!(id = %request.id, provider = %assignment.provider_name, cost = request.cost, "request completed");
                request
            }
            Some(Err(ExecutionError::RateLimited { message, headers })) => {
                self.tracker
                    .note_rate_limit_hit(&assignment.provider_name, &assignment.model)
                    .await;
                self.tracker
                    .update_rate_limit(&assignment.provider_name, &assignment.model, &headers)
                    .await;
                self.record_outcome(
                    &request.id,
                    &assignment,
                    &Outcome::failure(latency_ms, true),
                )
                .await;
                self.mirror_rate_limit_state(&assignment).await;
                self.finish_failed(request, format!("rate limited: {message}")).await
            }
            Some(Err(ExecutionError::Failed { message })) => {
                self.record_outcome(
                    &request.id,
                    &assignment,
                    &Outcome::failure(latency_ms, false),
                )
                .await;
                self.finish_failed(request, message).await
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<RouteRequest> {
        self.requests.read().await.get(id).cloned()
    }

    pub async fn in_flight(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Drop terminal requests older than the configured TTL.
    pub async fn prune_completed(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.config.request_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let cutoff = chrono::Utc::now() - ttl;
        let mut requests = self.requests.write().await;
        let before = requests.len();
        requests.retain(|_, request| {
            !(request.status.is_terminal()
                && request.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let removed = before - requests.len();
        if removed > 0 {
            debug!(removed, remaining = requests.len(), "completed requests pruned");
        }
        removed
    }

    async fn store(&self, request: RouteRequest) {
        self.requests.write().await.insert(request.id.clone(), request);
    }

    async fn finish_timeout(&self, mut request: RouteRequest) -> RouteRequest {
        warn!(id = %request.id, "request timed out");
        request.error = Some("request deadline exceeded".to_string());
        request.finish(RequestStatus::Timeout);
        self.store(request.clone()).await;
        request
    }

    async fn finish_failed(&self, mut request: RouteRequest, error: String) -> RouteRequest {
        warn!(id = %request.id, error = %error, "request failed");
        request.error = Some(error);
        request.finish(RequestStatus::Failed);
        self.store(request.clone()).await;
        request
    }

    async fn record_outcome(&self, task_id: &str, assignment: &Assignment, outcome: &Outcome) {
        if let Err(error) = self
            .learner
            .record_outcome(task_id, &assignment.provider_name, &assignment.model, outcome)
            .await
        {
            // A reload can swap out the provider mid-request.
            warn!(task_id, provider = %assignment.provider_name, %error, "outcome could not be recorded");
        }
    }

    async fn mirror_to_sink(
        &self,
        complexity: &Complexity,
        assignment: &Assignment,
        actual_cost: f64,
        tokens: u64,
    ) {
        let Some(sink) = &self.sink else { return };

        let original_provider = assignment
            .alternatives
            .first()
            .map(|alternative| alternative.provider_name.clone())
            .unwrap_or_else(|| assignment.provider_name.clone());
        let event = OptimizationEvent {
            original_provider,
            selected_provider: assignment.provider_name.clone(),
            estimated_cost: assignment.estimated_cost,
            actual_cost,
            tokens,
            complexity: complexity.overall,
            reason: assignment.reasoning.clone(),
        };
        if let Err(error) = sink.record_optimization(&event).await {
            warn!(%error, "metrics sink rejected optimization event");
        }
    }

    async fn mirror_rate_limit_state(&self, assignment: &Assignment) {
        let Some(sink) = &self.sink else { return };
        if let Some(state) = self
            .tracker
            .rate_limit_state(&assignment.provider_name, &assignment.model)
            .await
        {
            if let Err(error) = sink
                .update_rate_limit_status(&assignment.provider_name, &assignment.model, &state)
                .await
            {
                warn!(%error, "metrics sink rejected rate limit state");
            }
        }
    }

    /// Learner-facing quality heuristic for a successful result.
    fn quality_score(content: &str, complexity: &Complexity) -> f64 {
        let mut score: f64 = 0.7;
        if content.len() > 50 {
            score += 0.1;
        }
        if content.len() > 200 {
            score += 0.1;
        }
        if complexity.overall >= ComplexityLevel::High {
            score += 0.1;
        }
        score.min(1.0)
    }
}
