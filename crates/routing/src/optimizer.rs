//! Self-supervised prompt optimization.
//!
//! A bounded hill-climb rewrites the prompt through a fixed strategy cycle,
//! scored by a deterministic quality heuristic. Results are cached by a
//! fingerprint of (prompt, complexity bucket) with TTL and least-used
//! eviction, so repeated traffic costs one optimization.

use crate::complexity::{Complexity, ComplexityLevel};
use common::{RouterResult, SpoConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Result of one optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPrompt {
    pub original: String,
    pub optimized: String,
    /// Hill-climb rounds executed; zero means the result came from cache.
    pub iterations: u32,
    pub improvements: Vec<String>,
    pub confidence: f64,
    pub estimated_cost_savings: f64,
}

/// Cached optimization entry.
#[derive(Debug, Clone)]
struct CachedOptimization {
    optimized: String,
    score: f64,
    improvements: Vec<String>,
    created_at: Instant,
    hit_count: u64,
}

const STRATEGY_COUNT: usize = 5;
const COST_SAVINGS_FACTOR: f64 = 0.30;

static CLARITY_WORDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["specific", "detailed", "clear", "please", "exactly"]
        .iter()
        .map(|w| Regex::new(&format!(r"(?i)\b{w}\b")).expect("static pattern must compile"))
        .collect()
});

static CONTEXT_WORDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["context", "background", "relevant", "consider"]
        .iter()
        .map(|w| Regex::new(&format!(r"(?i)\b{w}\b")).expect("static pattern must compile"))
        .collect()
});

/// Prompt optimizer with its private cache.
#[derive(Debug)]
pub struct PromptOptimizer {
    cache: Arc<RwLock<HashMap<String, CachedOptimization>>>,
    config: SpoConfig,
}

impl PromptOptimizer {
    pub fn new(config: SpoConfig) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Optimize `prompt` for the given complexity.
    ///
    /// Deterministic: identical (prompt, complexity score bucket) pairs yield
    /// byte-identical optimized text, whether or not the cache is hit.
    pub async fn optimize(
        &self,
        prompt: &str,
        complexity: &Complexity,
    ) -> RouterResult<OptimizedPrompt> {
        let fingerprint = Self::fingerprint(prompt, complexity.score);

        {
            let mut cache = self.cache.write().await;
            if let Some(entry) = cache.get_mut(&fingerprint) {
                if entry.created_at.elapsed() <= self.config.cache_ttl {
                    entry.hit_count += 1;
                    trace!(fingerprint = %fingerprint, hits = entry.hit_count, "optimization cache hit");
                    return Ok(OptimizedPrompt {
                        original: prompt.to_string(),
                        optimized: entry.optimized.clone(),
                        iterations: 0,
                        improvements: entry.improvements.clone(),
                        confidence: entry.score,
                        estimated_cost_savings: entry.score * COST_SAVINGS_FACTOR,
                    });
                }
                // Expired entries are ineligible for read; fall through and
                // recompute in place.
            }
        }

        let result = self.run_hill_climb(prompt, complexity);

        {
            let mut cache = self.cache.write().await;
            if !cache.contains_key(&fingerprint) && cache.len() >= self.config.cache_size {
                Self::evict_least_used(&mut cache);
            }
            cache.insert(
                fingerprint.clone(),
                CachedOptimization {
                    optimized: result.optimized.clone(),
                    score: result.confidence,
                    improvements: result.improvements.clone(),
                    created_at: Instant::now(),
                    hit_count: 0,
                },
            );
        }

        debug!(
            iterations = result.iterations,
            score = result.confidence,
            "prompt optimized"
        );
        Ok(result)
    }

    /// Bounded hill-climb over the strategy cycle.
    fn run_hill_climb(&self, prompt: &str, complexity: &Complexity) -> OptimizedPrompt {
        let mut best = prompt.to_string();
        let mut best_score = Self::quality(&best, complexity);
        let mut current = best.clone();
        let mut improvements: Vec<String> = Vec::new();
        let mut iterations = 0u32;

        for round in 0..self.config.max_iterations {
            iterations = round + 1;

            let mut round_best: Option<(String, f64)> = None;
            for sample in 0..self.config.samples_per_round {
                let strategy =
                    (round as usize * self.config.samples_per_round as usize + sample as usize)
                        % STRATEGY_COUNT;
                let variant = Self::apply_strategy(strategy, &current, complexity);
                let score = Self::quality(&variant, complexity);
                match &round_best {
                    Some((_, current_best)) if score <= *current_best => {}
                    _ => round_best = Some((variant, score)),
                }
            }

            let (variant, score) = match round_best {
                Some(found) => found,
                None => break,
            };

            if score > best_score {
                best = variant;
                best_score = score;
                improvements.push(Self::improvement_label(prompt, &best).to_string());
                current = best.clone();
            } else if best_score >= 1.0 - self.config.convergence_rate {
                break;
            }
        }

        OptimizedPrompt {
            original: prompt.to_string(),
            optimized: best,
            iterations,
            improvements,
            confidence: best_score,
            estimated_cost_savings: best_score * COST_SAVINGS_FACTOR,
        }
    }

    /// Deterministic, content-preserving rewrite strategies. Each appends a
    /// directive tuned to the complexity level and is a no-op if its directive
    /// is already present.
    fn apply_strategy(index: usize, prompt: &str, complexity: &Complexity) -> String {
        let demanding = complexity.overall >= ComplexityLevel::High;
        let directive = match index {
            0 => {
                // add-clarification
                if demanding {
                    "Be specific and state exactly what is required."
                } else {
                    "Please be specific about what you need."
                }
            }
            1 => {
                // add-structure
                if demanding {
                    "Structure the response with clear headings and bullet points."
                } else {
                    "Organize the response in a clear, readable way."
                }
            }
            2 => {
                // add-context
                "Consider all relevant context and background before answering."
            }
            3 => {
                // add-constraints
                if demanding {
                    "State the constraints and assumptions you rely on, and be exact about edge cases."
                } else {
                    "Please note any important constraints."
                }
            }
            _ => {
                // add-examples
                if demanding {
                    "Include detailed examples that illustrate each point."
                } else {
                    "Include a specific example."
                }
            }
        };

        if prompt.contains(directive) {
            return prompt.to_string();
        }
        format!("{prompt}\n\n{directive}")
    }

    /// Deterministic quality heuristic, clamped to [0, 1]. No external calls.
    fn quality(prompt: &str, complexity: &Complexity) -> f64 {
        let word_count = prompt.split_whitespace().count();
        let mut score = 0.0;

        if (10..=100).contains(&word_count) {
            score += 0.3;
        }
        score += 0.1 * CLARITY_WORDS.iter().filter(|r| r.is_match(prompt)).count() as f64;
        if prompt.contains('\n') {
            score += 0.2;
        }
        score += 0.1 * CONTEXT_WORDS.iter().filter(|r| r.is_match(prompt)).count() as f64;
        if complexity.overall >= ComplexityLevel::High && word_count >= 20 {
            score += 0.2;
        }

        score.clamp(0.0, 1.0)
    }

    /// Label describing what changed between the original and optimized text.
    fn improvement_label(original: &str, optimized: &str) -> &'static str {
        if optimized.len() as f64 >= original.len() as f64 * 1.2 {
            "Added detailed guidance"
        } else if !original.contains('\n') && optimized.contains('\n') {
            "Improved structure"
        } else if CLARITY_WORDS
            .iter()
            .any(|r| r.is_match(optimized) && !r.is_match(original))
        {
            "Enhanced clarity"
        } else {
            "General optimization"
        }
    }

    /// Fingerprint of (prompt, complexity score rounded to two decimals).
    fn fingerprint(prompt: &str, score: f64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(format!("|{:.2}", score).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn evict_least_used(cache: &mut HashMap<String, CachedOptimization>) {
        if let Some(key) = cache
            .iter()
            .min_by_key(|(_, entry)| entry.hit_count)
            .map(|(key, _)| key.clone())
        {
            trace!(fingerprint = %key, "evicting least-used optimization");
            cache.remove(&key);
        }
    }

    /// Drop entries older than the TTL; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let ttl = self.config.cache_ttl;
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, remaining = cache.len(), "optimization cache swept");
        }
        removed
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}
