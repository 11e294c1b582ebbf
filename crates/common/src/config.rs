//! Runtime configuration for the routing core.
//!
//! Every knob is read at startup from TOML (or built from `Default`); the
//! selector weights are additionally mutable at runtime through the service
//! facade.

use crate::errors::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub spo: SpoConfig,
    pub selector: SelectorConfig,
    pub health: HealthConfig,
    pub orchestrator: OrchestratorConfig,
    pub learner: LearnerConfig,
    pub aggregator: AggregatorConfig,
}

impl RouterConfig {
    /// Load configuration from a TOML file, filling omitted keys with defaults.
    pub fn load(path: &Path) -> RouterResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Configuration(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> RouterResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| RouterError::Configuration(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RouterResult<()> {
        if self.spo.max_iterations == 0 {
            return Err(RouterError::Configuration(
                "spo.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.spo.samples_per_round == 0 {
            return Err(RouterError::Configuration(
                "spo.samples_per_round must be at least 1".to_string(),
            ));
        }
        if self.spo.cache_size == 0 {
            return Err(RouterError::Configuration(
                "spo.cache_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learner.adaptation_rate) {
            return Err(RouterError::Configuration(
                "learner.adaptation_rate must be within [0, 1]".to_string(),
            ));
        }
        self.selector.weights.validate()
    }
}

/// Self-supervised prompt optimizer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoConfig {
    pub max_iterations: u32,
    pub samples_per_round: u32,
    pub convergence_rate: f64,
    pub cache_size: usize,
    pub cache_ttl: Duration,
    pub sweeper_interval: Duration,
}

impl Default for SpoConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            samples_per_round: 3,
            convergence_rate: 0.05,
            cache_size: 1000,
            cache_ttl: Duration::from_secs(3600), // 1 hour
            sweeper_interval: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Weights for the selector's composite score.
///
/// The first four apply to normalized sub-scores; `tier_fit` and `complexity`
/// are additive bonuses. The runtime update path validates that the five
/// externally settable weights sum to at most 1.1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    pub cost: f64,
    pub reliability: f64,
    pub latency: f64,
    pub reliability_secondary: f64,
    pub tier_fit: f64,
    pub complexity: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            cost: 0.40,
            reliability: 0.25,
            latency: 0.20,
            reliability_secondary: 0.15,
            tier_fit: 0.20,
            complexity: 0.10,
        }
    }
}

impl SelectionWeights {
    /// Sum of the externally settable weights (excludes the secondary
    /// reliability term, which is not part of the update API).
    pub fn settable_sum(&self) -> f64 {
        self.cost + self.reliability + self.latency + self.tier_fit + self.complexity
    }

    /// Sum of every weight; used to normalize scores into a confidence.
    pub fn total(&self) -> f64 {
        self.settable_sum() + self.reliability_secondary
    }

    pub fn validate(&self) -> RouterResult<()> {
        let all = [
            self.cost,
            self.reliability,
            self.latency,
            self.reliability_secondary,
            self.tier_fit,
            self.complexity,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RouterError::Configuration(
                "selection weights must be finite and non-negative".to_string(),
            ));
        }
        if self.settable_sum() > 1.1 {
            return Err(RouterError::Configuration(format!(
                "selection weights sum to {:.3}, maximum is 1.1",
                self.settable_sum()
            )));
        }
        Ok(())
    }
}

/// Scoring selector knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub weights: SelectionWeights,
    /// Providers above this blended USD-per-token cost are gated out.
    pub cost_threshold: f64,
    /// Providers below this success rate are gated out.
    pub reliability_threshold: f64,
    /// Baseline cost used to normalize the cost sub-score.
    pub cost_baseline: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            weights: SelectionWeights::default(),
            cost_threshold: 5e-5,
            reliability_threshold: 0.95,
            cost_baseline: 3e-5,
        }
    }
}

/// Health & rate-limit tracker knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Trailing interval inside which usage records contribute to scoring.
    pub window: Duration,
    pub sweeper_interval: Duration,
    /// Score returned when a (provider, model) pair has no records in window.
    pub neutral_score: f64,
    pub reliability_weight: f64,
    pub cost_weight: f64,
    pub rate_limit_weight: f64,
    /// Baseline USD-per-token for the cost-efficiency curve.
    pub cost_baseline: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 3600), // 24 hours
            sweeper_interval: Duration::from_secs(600), // 10 minutes
            neutral_score: 0.8,
            reliability_weight: 0.30,
            cost_weight: 0.50,
            rate_limit_weight: 0.20,
            cost_baseline: 3e-5,
        }
    }
}

/// Pipeline orchestrator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Overall deadline for one request, classification through execution.
    pub task_timeout: Duration,
    /// Completed requests older than this are pruned from the in-flight map.
    pub request_ttl: Duration,
    pub prune_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(300), // 5 minutes
            request_ttl: Duration::from_secs(3600), // 1 hour
            prune_interval: Duration::from_secs(30),
        }
    }
}

/// Feedback learner knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// EMA alpha applied to every running provider statistic.
    pub adaptation_rate: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            adaptation_rate: 0.05,
        }
    }
}

/// Metrics aggregator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}
