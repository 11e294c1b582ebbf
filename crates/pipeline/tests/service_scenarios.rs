//! End-to-end scenarios through the full service: classification, prompt
//! optimization, selection, execution, and learning, with a scripted
//! executor standing in for real providers.

use async_trait::async_trait;
use common::RouterConfig;
use pipeline::{
    ExecutionError, ExecutionOutput, Executor, ProcessInput, RequestStatus, RouterService,
};
use routing::{
    Assignment, ComplexityLevel, OptimizedPrompt, ProviderRecord, ProviderTier, StaticSource,
    WeightUpdate,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Script {
    Succeed { content: String, cost: f64 },
    Sleep(Duration),
}

struct ScriptedExecutor {
    script: Script,
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(
        &self,
        _prompt: &OptimizedPrompt,
        _assignment: &Assignment,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        match &self.script {
            Script::Succeed { content, cost } => Ok(ExecutionOutput {
                content: content.clone(),
                cost: *cost,
                tokens_used: 500,
                rate_limit_headers: HashMap::new(),
            }),
            Script::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(ExecutionOutput::default()),
                    _ = cancel.cancelled() => Err(ExecutionError::failed("cancelled")),
                }
            }
        }
    }
}

fn three_tier_records() -> Vec<ProviderRecord> {
    vec![
        ProviderRecord::new("OpenAI", ProviderTier::Official, "https://api.openai.com", &[
            "gpt-4o",
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

async fn service_with(script: Script, config: RouterConfig) -> RouterService {
    common::init_logging();
    RouterService::new(
        config,
        Arc::new(StaticSource::new(three_tier_records())),
        Arc::new(ScriptedExecutor { script }),
        None,
    )
    .await
    .expect("service builds")
}

fn ok_script() -> Script {
    Script::Succeed {
        content: "An old silent pond / a frog jumps into the pond / splash, silence again".to_string(),
        cost: 0.0,
    }
}

#[tokio::test]
async fn simple_creative_prompt_routes_to_community() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    let request = service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;

    assert_eq!(request.status, RequestStatus::Completed);
    let complexity = request.complexity.as_ref().expect("classified");
    assert_eq!(complexity.overall, ComplexityLevel::Medium);

    let assignment = request.assignment.as_ref().expect("assigned");
    assert_eq!(assignment.provider_name, "Pollinations");
}

#[tokio::test]
async fn complex_math_routes_to_official() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    let request = service
        .process(ProcessInput::new(
            "Provide a formal proof of Fermat's Last Theorem with integrals and calculus.",
        ))
        .await;

    assert_eq!(request.status, RequestStatus::Completed);
    let complexity = request.complexity.as_ref().expect("classified");
    assert!(matches!(
        complexity.overall,
        ComplexityLevel::High | ComplexityLevel::VeryHigh
    ));

    let assignment = request.assignment.as_ref().expect("assigned");
    assert_eq!(assignment.provider_name, "OpenAI");
}

#[tokio::test]
async fn rate_limited_provider_is_excluded() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    for _ in 0..4 {
        service
            .tracker()
            .note_rate_limit_hit("Pollinations", "openai")
            .await;
    }

    let request = service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;

    let assignment = request.assignment.as_ref().expect("assigned");
    assert_ne!(assignment.provider_name, "Pollinations");
    // Gating fallback is not active, so the drained provider must not even
    // appear among the alternatives.
    assert!(!assignment.reasoning.contains("degraded_selection"));
    assert!(assignment
        .alternatives
        .iter()
        .all(|alt| alt.provider_name != "Pollinations"));
}

#[tokio::test]
async fn repeated_prompt_hits_the_optimization_cache() {
    let service = service_with(ok_script(), RouterConfig::default()).await;
    let prompt = "Write a haiku about AI.";

    let first = service.process(ProcessInput::new(prompt)).await;
    let second = service.process(ProcessInput::new(prompt)).await;

    let first_opt = first.optimized_prompt.as_ref().expect("optimized");
    let second_opt = second.optimized_prompt.as_ref().expect("optimized");

    assert!(first_opt.iterations >= 1);
    assert_eq!(second_opt.iterations, 0);
    assert_eq!(first_opt.optimized, second_opt.optimized);
}

#[tokio::test]
async fn timeout_leaves_provider_metrics_untouched() {
    let mut config = RouterConfig::default();
    config.orchestrator.task_timeout = Duration::from_millis(50);
    let service = service_with(Script::Sleep(Duration::from_secs(10)), config).await;

    let request = service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;

    assert_eq!(request.status, RequestStatus::Timeout);
    for provider in service.registry().snapshot().await {
        assert_eq!(
            provider.metrics.request_count, 0,
            "timed-out request must not reach the learner"
        );
    }
}

#[tokio::test]
async fn weight_update_takes_effect_immediately() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    // Learned state: OpenAI is the most reliable, LocalLlama free but laggy.
    let seed = |service: &RouterService| {
        let registry = Arc::clone(service.registry());
        async move {
            for (name, success, latency) in [
                ("OpenAI", 0.99, 500.0),
                ("Pollinations", 0.95, 2000.0),
                ("LocalLlama", 0.96, 4000.0),
            ] {
                registry
                    .update_metrics(name, |m| {
                        m.success_rate = success;
                        m.average_latency_ms = latency;
                        m.reliability_score = 0.7 * success + 0.3 * (1.0 - latency / 5000.0);
                    })
                    .await
                    .unwrap();
            }
        }
    };

    seed(&service).await;
    let before = service.process(ProcessInput::new("Good morning!")).await;
    assert_eq!(
        before.complexity.as_ref().unwrap().overall,
        ComplexityLevel::Low
    );
    assert_eq!(
        before.assignment.as_ref().unwrap().provider_name,
        "LocalLlama"
    );

    // Re-seed (the first execution nudged the chosen provider's averages),
    // then flip the weights toward reliability.
    seed(&service).await;
    service
        .update_weights(WeightUpdate {
            cost: 0.1,
            reliability: 0.7,
            latency: 0.1,
            tier_fit: 0.1,
            complexity: 0.1,
        })
        .await
        .unwrap();

    let after = service.process(ProcessInput::new("Good morning!")).await;
    assert_eq!(after.assignment.as_ref().unwrap().provider_name, "OpenAI");
}

#[tokio::test]
async fn excessive_weights_are_rejected() {
    let service = service_with(ok_script(), RouterConfig::default()).await;
    let result = service
        .update_weights(WeightUpdate {
            cost: 0.6,
            reliability: 0.6,
            latency: 0.2,
            tier_fit: 0.2,
            complexity: 0.2,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn providers_listing_includes_health_and_limits() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;
    service
        .tracker()
        .note_rate_limit_hit("Pollinations", "openai")
        .await;

    let statuses = service.providers_with_health().await;
    assert_eq!(statuses.len(), 3);

    let pollinations = statuses
        .iter()
        .find(|s| s.provider.name == "Pollinations")
        .expect("listed");
    assert!(pollinations.health_scores.contains_key("openai"));
    assert_eq!(pollinations.rate_limits["openai"].consecutive_hits, 1);

    // The executed request shows up in the chosen provider's metrics.
    assert!(statuses.iter().any(|s| s.provider.metrics.request_count > 0));
}

#[tokio::test]
async fn system_metrics_track_processed_requests() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;
    service
        .process(ProcessInput::new("Write a haiku about autumn rain and AI."))
        .await;

    let metrics = service.refresh_metrics().await;
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.successful_requests, 2);
    assert_eq!(metrics.failed_requests, 0);
    assert!(!metrics.provider_health.is_empty());

    let json = service.system_metrics_json().await.unwrap();
    assert!(json.contains("\"total_requests\": 2"));
}

#[tokio::test]
async fn route_request_serializes_for_transport() {
    let service = service_with(ok_script(), RouterConfig::default()).await;
    let request = service
        .process(ProcessInput::new("Write a haiku about AI."))
        .await;

    let value = serde_json::to_value(&request).expect("serializes");
    assert_eq!(value["status"], "completed");
    assert_eq!(value["complexity"]["overall"], "medium");
    assert!(value["assignment"]["provider_name"].is_string());
    assert!(value["optimized_prompt"]["optimized"].is_string());
}

#[tokio::test]
async fn registry_refresh_swaps_the_pool() {
    let config = RouterConfig::default();
    let source = Arc::new(StaticSource::new(three_tier_records()));
    let service = RouterService::new(
        config,
        source,
        Arc::new(ScriptedExecutor { script: ok_script() }),
        None,
    )
    .await
    .unwrap();

    let reloaded = service.refresh_registry().await.unwrap();
    assert_eq!(reloaded, 3);
    assert_eq!(service.registry().snapshot().await.len(), 3);
}

#[tokio::test]
async fn requests_are_queryable_by_id() {
    let service = service_with(ok_script(), RouterConfig::default()).await;

    let processed = service
        .process(ProcessInput::new("Write a haiku about AI.").with_id("req-42"))
        .await;
    assert_eq!(processed.id, "req-42");

    let fetched = service.request("req-42").await.expect("stored");
    assert_eq!(fetched.status, RequestStatus::Completed);
    assert!(service.request("missing").await.is_none());
}

#[tokio::test]
async fn concurrent_requests_keep_metrics_consistent() {
    let service = Arc::new(service_with(ok_script(), RouterConfig::default()).await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .process(ProcessInput::new(&format!("Write a haiku about AI, take {i}.")))
                .await
        }));
    }

    for handle in handles {
        let request = handle.await.expect("task joins");
        assert_eq!(request.status, RequestStatus::Completed);
    }

    // Counts line up across the pool no matter how the requests interleaved.
    let mut total = 0;
    for provider in service.registry().snapshot().await {
        assert_eq!(
            provider.metrics.success_count + provider.metrics.failure_count,
            provider.metrics.request_count
        );
        total += provider.metrics.request_count;
    }
    assert_eq!(total, 16);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_requests() {
    let mut config = RouterConfig::default();
    config.orchestrator.task_timeout = Duration::from_secs(60);
    let service = Arc::new(service_with(Script::Sleep(Duration::from_secs(60)), config).await);
    service.start();

    let worker = Arc::clone(&service);
    let handle = tokio::spawn(async move {
        worker
            .process(ProcessInput::new("Write a haiku about AI."))
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.shutdown();

    let request = handle.await.unwrap();
    assert_eq!(request.status, RequestStatus::Timeout);
}
