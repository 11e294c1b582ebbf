//! Provider data model: tiers, pricing, running metrics, and the loader
//! contract through which an inventory source feeds the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Commercial category of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    /// Paid, premium SLA.
    Official,
    /// Free or low-cost, best-effort.
    Community,
    /// Reverse-engineered or local, no SLA.
    Unofficial,
}

impl ProviderTier {
    /// Default per-token pricing (USD) applied when the inventory carries no
    /// explicit prices for a provider.
    pub fn default_pricing(&self) -> Pricing {
        match self {
            ProviderTier::Official => Pricing::per_token(3e-5, 6e-5),
            ProviderTier::Community => Pricing::per_token(1e-5, 2e-5),
            ProviderTier::Unofficial => Pricing::per_token(0.0, 0.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::Official => "official",
            ProviderTier::Community => "community",
            ProviderTier::Unofficial => "unofficial",
        }
    }
}

/// Unit costs for a provider, per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_cost: f64,
    pub output_cost: f64,
    pub currency: String,
}

impl Pricing {
    pub fn per_token(input_cost: f64, output_cost: f64) -> Self {
        Self {
            input_cost,
            output_cost,
            currency: "USD".to_string(),
        }
    }

    /// Blended cost per token assuming the standard 70/30 input/output split.
    pub fn blended_cost_per_token(&self) -> f64 {
        0.7 * self.input_cost + 0.3 * self.output_cost
    }
}

/// Running statistics for one provider, updated exclusively by the feedback
/// learner via exponential moving averages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub average_cost: f64,
    pub quality_score: f64,
    pub cost_efficiency: f64,
    pub reliability_score: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        // Optimistic priors so an unused provider is not gated out before the
        // learner has seen a single outcome.
        Self {
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: 1.0,
            average_latency_ms: 0.0,
            average_cost: 0.0,
            quality_score: 0.7,
            cost_efficiency: 0.0,
            reliability_score: 1.0,
            last_updated: None,
        }
    }
}

/// A provider in the registry. Created at registry load, metrics mutated only
/// through the registry's writer path, replaced wholesale on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub tier: ProviderTier,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_credential: Option<String>,
    pub models: Vec<String>,
    pub pricing: Pricing,
    pub metrics: ProviderMetrics,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Provider {
    pub fn from_record(record: ProviderRecord) -> Self {
        let pricing = record
            .pricing
            .unwrap_or_else(|| record.tier.default_pricing());
        Self {
            name: record.name,
            tier: record.tier,
            base_url: record.base_url,
            auth_credential: record.auth_credential,
            models: record.models,
            pricing,
            metrics: ProviderMetrics::default(),
            metadata: record.metadata,
        }
    }

    pub fn cost_per_token(&self) -> f64 {
        self.pricing.blended_cost_per_token()
    }

    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Inventory row handed to the registry by an external loader (CSV, YAML, or
/// anything else that can produce one of these).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    pub tier: ProviderTier,
    pub base_url: String,
    #[serde(default)]
    pub auth_credential: Option<String>,
    pub models: Vec<String>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderRecord {
    pub fn new(name: &str, tier: ProviderTier, base_url: &str, models: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tier,
            base_url: base_url.to_string(),
            auth_credential: None,
            models: models.iter().map(|m| m.to_string()).collect(),
            pricing: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_pricing(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.pricing = Some(Pricing::per_token(input_cost, output_cost));
        self
    }

    pub fn with_auth(mut self, credential: &str) -> Self {
        self.auth_credential = Some(credential.to_string());
        self
    }
}
