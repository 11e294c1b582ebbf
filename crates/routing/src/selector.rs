//! Cost-aware provider selection.
//!
//! Ranks the registry snapshot by a weighted composite of cost, reliability,
//! latency, tier fit, and complexity alignment, after gating out providers
//! that fail the cost/reliability thresholds or the rate limiter. When gating
//! empties the pool the selector falls back to ranking everything and marks
//! the decision as degraded, so a selection is always possible.

use crate::complexity::{Complexity, ComplexityLevel};
use crate::health::HealthTracker;
use crate::providers::{Provider, ProviderTier};
use crate::registry::ProviderRegistry;
use common::{RouterError, RouterResult, SelectionWeights, SelectorConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Caller constraints for one selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Pin the model instead of using each provider's first listed model.
    pub model: Option<String>,
    /// Domain tag stretching the token estimate (code, math, creative).
    pub domain: Option<String>,
    /// Ceiling on the estimated request cost in USD.
    pub max_cost: Option<f64>,
}

/// A ranked non-primary candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentOption {
    pub provider_name: String,
    pub model: String,
    pub confidence: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub reasoning: String,
}

/// The selector's decision: a primary choice plus ranked alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub provider_name: String,
    pub model: String,
    pub confidence: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: f64,
    pub reasoning: String,
    pub alternatives: Vec<AssignmentOption>,
}

const MAX_ALTERNATIVES: usize = 3;
const INPUT_SPLIT: f64 = 0.7;
const OUTPUT_SPLIT: f64 = 0.3;

#[derive(Debug)]
struct ScoredCandidate {
    provider_name: String,
    model: String,
    score: f64,
    cost_per_token: f64,
    reliability: f64,
    estimated_cost: f64,
    estimated_latency_ms: f64,
    reasoning: String,
    gate_reason: Option<String>,
}

/// Weighted scoring selector over the registry and health tracker.
#[derive(Debug)]
pub struct ScoringSelector {
    registry: Arc<ProviderRegistry>,
    tracker: Arc<HealthTracker>,
    weights: Arc<RwLock<SelectionWeights>>,
    config: SelectorConfig,
}

impl ScoringSelector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        tracker: Arc<HealthTracker>,
        config: SelectorConfig,
    ) -> Self {
        let weights = Arc::new(RwLock::new(config.weights));
        Self {
            registry,
            tracker,
            weights,
            config,
        }
    }

    /// Current weights; runtime updates are visible to the next `select`.
    pub async fn weights(&self) -> SelectionWeights {
        *self.weights.read().await
    }

    /// Replace the externally settable weights after validation.
    pub async fn update_weights(&self, update: WeightUpdate) -> RouterResult<SelectionWeights> {
        let mut weights = self.weights.write().await;
        let next = SelectionWeights {
            cost: update.cost,
            reliability: update.reliability,
            latency: update.latency,
            reliability_secondary: weights.reliability_secondary,
            tier_fit: update.tier_fit,
            complexity: update.complexity,
        };
        next.validate()?;
        *weights = next;
        info!(?next, "selection weights updated");
        Ok(next)
    }

    /// Pick a provider and model for one task.
    pub async fn select(
        &self,
        task_id: &str,
        complexity: &Complexity,
        requirements: &Requirements,
    ) -> RouterResult<Assignment> {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return Err(RouterError::NoProvidersAvailable);
        }

        let candidates: Vec<&Provider> = match &requirements.model {
            Some(model) => snapshot.iter().filter(|p| p.has_model(model)).collect(),
            None => snapshot.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(RouterError::NoProvidersAvailable);
        }

        let estimated_tokens = (complexity.overall.estimated_tokens() as f64
            * domain_factor(requirements.domain.as_deref()))
        .round() as u64;
        let weights = *self.weights.read().await;

        let mut scored = Vec::with_capacity(candidates.len());
        for provider in candidates {
            let model = match &requirements.model {
                Some(model) => model.clone(),
                None => match provider.default_model() {
                    Some(model) => model.to_string(),
                    None => continue,
                },
            };
            scored.push(
                self.score_candidate(provider, model, complexity, estimated_tokens, &weights, requirements)
                    .await,
            );
        }
        if scored.is_empty() {
            return Err(RouterError::NoProvidersAvailable);
        }

        let mut eligible: Vec<&ScoredCandidate> =
            scored.iter().filter(|c| c.gate_reason.is_none()).collect();
        let degraded = eligible.is_empty();
        if degraded {
            warn!(task_id, "all providers gated out, falling back to degraded selection");
            eligible = scored.iter().collect();
        }

        eligible.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.cost_per_token.total_cmp(&b.cost_per_token))
                .then_with(|| b.reliability.total_cmp(&a.reliability))
                .then_with(|| a.provider_name.cmp(&b.provider_name))
        });

        let normalizer = weights.total().max(f64::EPSILON);
        let primary = eligible[0];
        let alternatives = eligible
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .map(|c| AssignmentOption {
                provider_name: c.provider_name.clone(),
                model: c.model.clone(),
                confidence: (c.score / normalizer).clamp(0.0, 1.0),
                estimated_cost: c.estimated_cost,
                estimated_latency_ms: c.estimated_latency_ms,
                reasoning: decorate_reasoning(&c.reasoning, &c.gate_reason, degraded),
            })
            .collect();

        let assignment = Assignment {
            provider_name: primary.provider_name.clone(),
            model: primary.model.clone(),
            confidence: (primary.score / normalizer).clamp(0.0, 1.0),
            estimated_cost: primary.estimated_cost,
            estimated_latency_ms: primary.estimated_latency_ms,
            reasoning: decorate_reasoning(&primary.reasoning, &primary.gate_reason, degraded),
            alternatives,
        };

        debug!(
            task_id,
            provider = %assignment.provider_name,
            model = %assignment.model,
            confidence = assignment.confidence,
            degraded,
            "provider selected"
        );
        Ok(assignment)
    }

    async fn score_candidate(
        &self,
        provider: &Provider,
        model: String,
        complexity: &Complexity,
        estimated_tokens: u64,
        weights: &SelectionWeights,
        requirements: &Requirements,
    ) -> ScoredCandidate {
        // Observed spend dominates; a provider nobody has exercised yet scores
        // as free until the learner has data.
        let cost_per_token = self
            .tracker
            .observed_cost_per_token(&provider.name, &model)
            .await
            .unwrap_or(0.0);

        let cost_score = (-cost_per_token / self.config.cost_baseline).exp().clamp(0.0, 1.0);
        let reliability = provider.metrics.success_rate;
        let latency_score = (1.0 - provider.metrics.average_latency_ms / 5000.0).clamp(0.0, 1.0);
        let reliability_secondary = provider.metrics.reliability_score;
        let tier_fit = tier_fit(provider.tier, complexity.overall);
        let alignment = complexity_alignment(provider.tier, complexity.overall);

        let score = weights.cost * cost_score
            + weights.reliability * reliability
            + weights.latency * latency_score
            + weights.reliability_secondary * reliability_secondary
            + weights.tier_fit * tier_fit
            + weights.complexity * alignment;

        let input_tokens = estimated_tokens as f64 * INPUT_SPLIT;
        let output_tokens = estimated_tokens as f64 * OUTPUT_SPLIT;
        let estimated_cost = input_tokens * provider.pricing.input_cost
            + output_tokens * provider.pricing.output_cost;
        let estimated_latency_ms =
            provider.metrics.average_latency_ms * complexity.overall.latency_multiplier();

        let (can_handle, limiter_reason) = self
            .tracker
            .can_handle(&provider.name, &model, estimated_tokens)
            .await;

        let gate_reason = if reliability < self.config.reliability_threshold {
            Some(format!(
                "reliability {:.3} below threshold {:.2}",
                reliability, self.config.reliability_threshold
            ))
        } else if cost_per_token > self.config.cost_threshold {
            Some(format!(
                "cost per token {:.2e} above threshold {:.2e}",
                cost_per_token, self.config.cost_threshold
            ))
        } else if !can_handle {
            Some(format!("rate limiter: {limiter_reason}"))
        } else if requirements
            .max_cost
            .map(|max| estimated_cost > max)
            .unwrap_or(false)
        {
            Some(format!("estimated cost {estimated_cost:.6} above requested ceiling"))
        } else {
            None
        };

        let reasoning = format!(
            "tier={} score components: cost={:.3} reliability={:.3} latency={:.3} tier_fit={:.2} alignment={:.1}; ~{} tokens",
            provider.tier.as_str(),
            cost_score,
            reliability,
            latency_score,
            tier_fit,
            alignment,
            estimated_tokens
        );

        ScoredCandidate {
            provider_name: provider.name.clone(),
            model,
            score,
            cost_per_token,
            reliability,
            estimated_cost,
            estimated_latency_ms,
            reasoning,
            gate_reason,
        }
    }
}

/// Update payload for the externally settable weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightUpdate {
    pub cost: f64,
    pub reliability: f64,
    pub latency: f64,
    pub tier_fit: f64,
    pub complexity: f64,
}

fn decorate_reasoning(reasoning: &str, gate_reason: &Option<String>, degraded: bool) -> String {
    match (degraded, gate_reason) {
        (true, Some(gate)) => format!("degraded_selection ({gate}): {reasoning}"),
        (true, None) => format!("degraded_selection: {reasoning}"),
        (false, _) => reasoning.to_string(),
    }
}

fn domain_factor(domain: Option<&str>) -> f64 {
    match domain {
        Some("code") => 1.5,
        Some("math") => 1.4,
        Some("creative") => 1.2,
        _ => 1.0,
    }
}

/// How well a commercial tier matches a complexity level.
fn tier_fit(tier: ProviderTier, overall: ComplexityLevel) -> f64 {
    match overall {
        ComplexityLevel::Low => match tier {
            ProviderTier::Unofficial => 1.0,
            ProviderTier::Community => 0.7,
            ProviderTier::Official => 0.3,
        },
        ComplexityLevel::Medium => match tier {
            ProviderTier::Community => 1.0,
            ProviderTier::Unofficial => 0.8,
            ProviderTier::Official => 0.6,
        },
        ComplexityLevel::High | ComplexityLevel::VeryHigh => match tier {
            ProviderTier::Official => 1.0,
            ProviderTier::Community => 0.4,
            ProviderTier::Unofficial => 0.1,
        },
    }
}

fn complexity_alignment(tier: ProviderTier, overall: ComplexityLevel) -> f64 {
    let aligned = (overall >= ComplexityLevel::High && tier == ProviderTier::Official)
        || (overall == ComplexityLevel::Medium && tier == ProviderTier::Community)
        || (overall <= ComplexityLevel::Medium && tier == ProviderTier::Unofficial);
    if aligned {
        1.0
    } else {
        0.5
    }
}
