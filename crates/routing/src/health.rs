//! Rolling health windows and rate-limit state per (provider, model).
//!
//! Usage records inside the trailing window drive the health score; the
//! limiter is a small state machine with lazy minute resets and a backoff
//! rule after repeated hits.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::HealthConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// One observation appended after a request finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub request_count: u32,
    pub failure_count: u32,
    pub latency_ms: f64,
    pub tokens_used: u64,
    pub cost: f64,
    pub rate_limited: bool,
}

impl UsageRecord {
    pub fn success(latency_ms: f64, tokens_used: u64, cost: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            request_count: 1,
            failure_count: 0,
            latency_ms,
            tokens_used,
            cost,
            rate_limited: false,
        }
    }

    pub fn failure(latency_ms: f64, rate_limited: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            request_count: 1,
            failure_count: 1,
            latency_ms,
            tokens_used: 0,
            cost: 0.0,
            rate_limited,
        }
    }
}

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_TOKENS_PER_MINUTE: u32 = 90_000;
const BACKOFF_HIT_THRESHOLD: u32 = 3;

/// Per-(provider, model) limiter state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    pub requests_per_minute_limit: u32,
    pub requests_remaining: u32,
    pub tokens_per_minute_limit: u32,
    pub tokens_remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub last_rate_limit_hit: Option<DateTime<Utc>>,
    pub consecutive_hits: u32,
}

impl RateLimitState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            requests_per_minute_limit: DEFAULT_REQUESTS_PER_MINUTE,
            requests_remaining: DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute_limit: DEFAULT_TOKENS_PER_MINUTE,
            tokens_remaining: DEFAULT_TOKENS_PER_MINUTE,
            reset_time: now + ChronoDuration::seconds(60),
            last_rate_limit_hit: None,
            consecutive_hits: 0,
        }
    }

    /// Restore counters for a new minute window.
    fn reset(&mut self, now: DateTime<Utc>) {
        self.requests_remaining = self.requests_per_minute_limit;
        self.tokens_remaining = self.tokens_per_minute_limit;
        self.consecutive_hits = 0;
        self.reset_time = now + ChronoDuration::seconds(60);
    }

    /// True when the limiter keeps less than 10% of its request budget.
    fn nearly_drained(&self) -> bool {
        self.requests_remaining < self.requests_per_minute_limit / 10
    }
}

type ModelKey = (String, String);

/// Rolling usage tracker and rate limiter.
///
/// Exclusively owns both maps; every other component goes through these
/// accessors. Keys are (provider name, model) — the name is the identity,
/// there are no back-pointers into the registry.
#[derive(Debug)]
pub struct HealthTracker {
    windows: Arc<RwLock<HashMap<ModelKey, VecDeque<UsageRecord>>>>,
    limits: Arc<RwLock<HashMap<ModelKey, RateLimitState>>>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            limits: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    fn key(provider: &str, model: &str) -> ModelKey {
        (provider.to_string(), model.to_string())
    }

    fn window_start(&self) -> DateTime<Utc> {
        Utc::now()
            - ChronoDuration::from_std(self.config.window)
                .unwrap_or_else(|_| ChronoDuration::seconds(86_400))
    }

    /// Append a usage record and evict anything older than the window.
    pub async fn record_usage(&self, provider: &str, model: &str, record: UsageRecord) {
        let cutoff = self.window_start();
        let mut windows = self.windows.write().await;
        let window = windows.entry(Self::key(provider, model)).or_default();
        window.push_back(record);
        while let Some(front) = window.front() {
            if front.timestamp < cutoff {
                window.pop_front();
            } else {
                break;
            }
        }
        trace!(provider, model, records = window.len(), "usage recorded");
    }

    /// Health score in [0, 1]: weighted reliability, cost efficiency, and
    /// rate-limit availability over the window. Neutral prior when empty.
    pub async fn health_score(&self, provider: &str, model: &str) -> f64 {
        let cutoff = self.window_start();
        let windows = self.windows.read().await;
        let records: Vec<&UsageRecord> = windows
            .get(&Self::key(provider, model))
            .map(|window| window.iter().filter(|r| r.timestamp >= cutoff).collect())
            .unwrap_or_default();

        if records.is_empty() {
            return self.config.neutral_score;
        }

        let requests: u64 = records.iter().map(|r| r.request_count as u64).sum();
        let failures: u64 = records.iter().map(|r| r.failure_count as u64).sum();
        let reliability = if requests > 0 {
            (requests.saturating_sub(failures)) as f64 / requests as f64
        } else {
            1.0
        };

        let cost_score = Self::cost_score(&records, self.config.cost_baseline);

        let hits = records.iter().filter(|r| r.rate_limited).count();
        let mut rate_score = 1.0 - hits as f64 / records.len() as f64;
        if let Some(state) = self.limits.read().await.get(&Self::key(provider, model)) {
            if state.nearly_drained() {
                rate_score *= 0.5;
            }
        }

        (self.config.reliability_weight * reliability
            + self.config.cost_weight * cost_score
            + self.config.rate_limit_weight * rate_score)
            .clamp(0.0, 1.0)
    }

    /// Cost-efficiency score in [0, 1] over the window; 1.0 with no spend.
    pub async fn cost_efficiency_score(&self, provider: &str, model: &str) -> f64 {
        let cutoff = self.window_start();
        let windows = self.windows.read().await;
        let records: Vec<&UsageRecord> = windows
            .get(&Self::key(provider, model))
            .map(|window| window.iter().filter(|r| r.timestamp >= cutoff).collect())
            .unwrap_or_default();
        if records.is_empty() {
            return self.config.neutral_score;
        }
        Self::cost_score(&records, self.config.cost_baseline)
    }

    fn cost_score(records: &[&UsageRecord], baseline: f64) -> f64 {
        let tokens: u64 = records.iter().map(|r| r.tokens_used).sum();
        let cost: f64 = records.iter().map(|r| r.cost).sum();
        let cost_per_token = if tokens > 0 { cost / tokens as f64 } else { 0.0 };
        (-cost_per_token / baseline).exp().clamp(0.0, 1.0)
    }

    /// Update limiter state from response headers.
    ///
    /// Tries the `X-RateLimit-*` family first, then `Retry-After`. Unknown
    /// headers are ignored.
    pub async fn update_rate_limit(
        &self,
        provider: &str,
        model: &str,
        headers: &HashMap<String, String>,
    ) {
        if headers.is_empty() {
            return;
        }
        let lowered: HashMap<String, &str> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();

        let now = Utc::now();
        let mut limits = self.limits.write().await;
        let state = limits
            .entry(Self::key(provider, model))
            .or_insert_with(|| RateLimitState::fresh(now));

        let mut saw_rate_limit_family = false;

        if let Some(limit) = parse_u32(&lowered, &["x-ratelimit-limit-requests", "x-ratelimit-limit"]) {
            state.requests_per_minute_limit = limit;
            saw_rate_limit_family = true;
        }
        if let Some(remaining) = parse_u32(
            &lowered,
            &["x-ratelimit-remaining-requests", "x-ratelimit-remaining"],
        ) {
            state.requests_remaining = remaining.min(state.requests_per_minute_limit);
            saw_rate_limit_family = true;
        }
        if let Some(limit) = parse_u32(&lowered, &["x-ratelimit-limit-tokens"]) {
            state.tokens_per_minute_limit = limit;
            saw_rate_limit_family = true;
        }
        if let Some(remaining) = parse_u32(&lowered, &["x-ratelimit-remaining-tokens"]) {
            state.tokens_remaining = remaining.min(state.tokens_per_minute_limit);
            saw_rate_limit_family = true;
        }
        if let Some(seconds) = parse_u32(&lowered, &["x-ratelimit-reset"]) {
            state.reset_time = now + ChronoDuration::seconds(seconds as i64);
            saw_rate_limit_family = true;
        }

        if !saw_rate_limit_family {
            if let Some(seconds) = parse_u32(&lowered, &["retry-after"]) {
                state.requests_remaining = 0;
                state.reset_time = now + ChronoDuration::seconds(seconds as i64);
            }
        }

        debug!(
            provider,
            model,
            requests_remaining = state.requests_remaining,
            tokens_remaining = state.tokens_remaining,
            "rate limit state updated"
        );
    }

    /// Record an observed 429-equivalent: drain the window and start backoff
    /// accounting.
    pub async fn note_rate_limit_hit(&self, provider: &str, model: &str) {
        let now = Utc::now();
        let mut limits = self.limits.write().await;
        let state = limits
            .entry(Self::key(provider, model))
            .or_insert_with(|| RateLimitState::fresh(now));

        state.requests_remaining = 0;
        state.tokens_remaining = 0;
        state.consecutive_hits += 1;
        state.last_rate_limit_hit = Some(now);
        state.reset_time = now + ChronoDuration::seconds(60);

        warn!(
            provider,
            model,
            consecutive_hits = state.consecutive_hits,
            "rate limit hit recorded"
        );
    }

    /// Can this (provider, model) take a request of `estimated_tokens` now?
    ///
    /// Evaluated in a fixed order; the first matching rule wins. The lazy
    /// minute reset mutates state, so this takes the writer lock briefly.
    pub async fn can_handle(
        &self,
        provider: &str,
        model: &str,
        estimated_tokens: u64,
    ) -> (bool, &'static str) {
        let now = Utc::now();
        let mut limits = self.limits.write().await;
        let state = match limits.get_mut(&Self::key(provider, model)) {
            Some(state) => state,
            None => return (true, "no_data"),
        };

        if now >= state.reset_time {
            state.reset(now);
        }

        if state.requests_remaining < 1 {
            return (false, "request_limit_exceeded");
        }

        // Double the estimate to buffer for input plus output tokens.
        if (state.tokens_remaining as u64) < estimated_tokens * 2 {
            return (false, "token_limit_exceeded");
        }

        if state.consecutive_hits > BACKOFF_HIT_THRESHOLD {
            if let Some(last_hit) = state.last_rate_limit_hit {
                let backoff = ChronoDuration::seconds(60 * state.consecutive_hits as i64);
                if now - last_hit < backoff {
                    return (false, "backoff");
                }
            }
        }

        (true, "available")
    }

    pub async fn rate_limit_state(&self, provider: &str, model: &str) -> Option<RateLimitState> {
        self.limits
            .read()
            .await
            .get(&Self::key(provider, model))
            .cloned()
    }

    /// Limiter snapshot for every tracked pair, keyed by provider name.
    pub async fn rate_limit_snapshot(&self) -> HashMap<String, HashMap<String, RateLimitState>> {
        let limits = self.limits.read().await;
        let mut snapshot: HashMap<String, HashMap<String, RateLimitState>> = HashMap::new();
        for ((provider, model), state) in limits.iter() {
            snapshot
                .entry(provider.clone())
                .or_default()
                .insert(model.clone(), state.clone());
        }
        snapshot
    }

    /// All (provider, model) pairs with records in the current window.
    pub async fn tracked_pairs(&self) -> Vec<(String, String)> {
        self.windows.read().await.keys().cloned().collect()
    }

    /// Observed USD-per-token over the window, if any tokens were seen.
    pub async fn observed_cost_per_token(&self, provider: &str, model: &str) -> Option<f64> {
        let cutoff = self.window_start();
        let windows = self.windows.read().await;
        let window = windows.get(&Self::key(provider, model))?;
        let mut tokens = 0u64;
        let mut cost = 0.0f64;
        for record in window.iter().filter(|r| r.timestamp >= cutoff) {
            tokens += record.tokens_used;
            cost += record.cost;
        }
        if tokens > 0 {
            Some(cost / tokens as f64)
        } else {
            None
        }
    }

    /// Sum of per-record cost over the current window, across all pairs.
    pub async fn total_cost(&self) -> f64 {
        let cutoff = self.window_start();
        let windows = self.windows.read().await;
        windows
            .values()
            .flat_map(|window| window.iter())
            .filter(|r| r.timestamp >= cutoff)
            .map(|r| r.cost)
            .sum()
    }

    /// Evict out-of-window records everywhere; returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let cutoff = self.window_start();
        let mut windows = self.windows.write().await;
        let mut removed = 0;
        for window in windows.values_mut() {
            let before = window.len();
            window.retain(|r| r.timestamp >= cutoff);
            removed += before - window.len();
        }
        windows.retain(|_, window| !window.is_empty());
        if removed > 0 {
            debug!(removed, "usage windows swept");
        }
        removed
    }

    #[cfg(test)]
    pub(crate) async fn window_len(&self, provider: &str, model: &str) -> usize {
        self.windows
            .read()
            .await
            .get(&Self::key(provider, model))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

fn parse_u32(headers: &HashMap<String, &str>, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthConfig::default())
    }

    #[tokio::test]
    async fn test_neutral_prior_without_records() {
        let tracker = tracker();
        let score = tracker.health_score("OpenAI", "gpt-4o").await;
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_health_score_perfect_free_provider() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker
                .record_usage("LocalLlama", "llama", UsageRecord::success(120.0, 400, 0.0))
                .await;
        }
        // reliability 1.0, cost exp(0) = 1.0, no rate limiting: full marks.
        let score = tracker.health_score("LocalLlama", "llama").await;
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_health_score_penalizes_failures_and_hits() {
        let tracker = tracker();
        tracker
            .record_usage("P", "m", UsageRecord::success(100.0, 100, 0.0))
            .await;
        tracker
            .record_usage("P", "m", UsageRecord::failure(100.0, true))
            .await;

        // reliability 0.5, cost 1.0, rate score 0.5.
        let score = tracker.health_score("P", "m").await;
        let expected = 0.30 * 0.5 + 0.50 * 1.0 + 0.20 * 0.5;
        assert!((score - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cost_score_decays_with_price() {
        let tracker = tracker();
        // 3e-5 per token, exactly the baseline: exp(-1).
        tracker
            .record_usage("Spendy", "m", UsageRecord::success(100.0, 1000, 0.03))
            .await;
        let score = tracker.cost_efficiency_score("Spendy", "m").await;
        assert!((score - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_old_records_evicted_on_append() {
        let config = HealthConfig {
            window: std::time::Duration::from_millis(30),
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config);

        tracker
            .record_usage("P", "m", UsageRecord::success(10.0, 10, 0.0))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tracker
            .record_usage("P", "m", UsageRecord::success(10.0, 10, 0.0))
            .await;

        assert_eq!(tracker.window_len("P", "m").await, 1);
    }

    #[tokio::test]
    async fn test_sweep_prunes_expired_records() {
        let config = HealthConfig {
            window: std::time::Duration::from_millis(30),
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config);
        tracker
            .record_usage("P", "m", UsageRecord::success(10.0, 10, 0.0))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let removed = tracker.sweep().await;
        assert_eq!(removed, 1);
        assert!(tracker.tracked_pairs().await.is_empty());
        // Back to the neutral prior once the window is empty.
        assert!((tracker.health_score("P", "m").await - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_can_handle_without_state() {
        let tracker = tracker();
        assert_eq!(tracker.can_handle("P", "m", 500).await, (true, "no_data"));
    }

    #[tokio::test]
    async fn test_rate_limit_hit_drains_window() {
        let tracker = tracker();
        tracker.note_rate_limit_hit("Pollinations", "openai").await;

        let (ok, reason) = tracker.can_handle("Pollinations", "openai", 100).await;
        assert!(!ok);
        assert_eq!(reason, "request_limit_exceeded");

        let state = tracker
            .rate_limit_state("Pollinations", "openai")
            .await
            .unwrap();
        assert_eq!(state.requests_remaining, 0);
        assert_eq!(state.consecutive_hits, 1);
        assert!(state.last_rate_limit_hit.is_some());
    }

    #[tokio::test]
    async fn test_consecutive_hits_accumulate() {
        let tracker = tracker();
        for _ in 0..4 {
            tracker.note_rate_limit_hit("P", "m").await;
        }
        let state = tracker.rate_limit_state("P", "m").await.unwrap();
        assert_eq!(state.consecutive_hits, 4);

        let (ok, _) = tracker.can_handle("P", "m", 10).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_token_budget_is_doubled() {
        let tracker = tracker();
        let headers = HashMap::from([
            ("x-ratelimit-limit-requests".to_string(), "60".to_string()),
            ("x-ratelimit-remaining-requests".to_string(), "10".to_string()),
            ("x-ratelimit-limit-tokens".to_string(), "1000".to_string()),
            ("x-ratelimit-remaining-tokens".to_string(), "900".to_string()),
        ]);
        tracker.update_rate_limit("P", "m", &headers).await;

        assert_eq!(tracker.can_handle("P", "m", 400).await, (true, "available"));
        let (ok, reason) = tracker.can_handle("P", "m", 500).await;
        assert!(!ok);
        assert_eq!(reason, "token_limit_exceeded");
    }

    #[tokio::test]
    async fn test_retry_after_family_drains_requests() {
        let tracker = tracker();
        let headers = HashMap::from([("Retry-After".to_string(), "30".to_string())]);
        tracker.update_rate_limit("P", "m", &headers).await;

        let (ok, reason) = tracker.can_handle("P", "m", 10).await;
        assert!(!ok);
        assert_eq!(reason, "request_limit_exceeded");
    }

    #[tokio::test]
    async fn test_lazy_reset_restores_counters() {
        let tracker = tracker();
        tracker.note_rate_limit_hit("P", "m").await;

        // Force the reset into the past.
        {
            let mut limits = tracker.limits.write().await;
            let state = limits
                .get_mut(&HealthTracker::key("P", "m"))
                .expect("state exists");
            state.reset_time = Utc::now() - ChronoDuration::seconds(1);
        }

        let (ok, reason) = tracker.can_handle("P", "m", 100).await;
        assert!(ok);
        assert_eq!(reason, "available");

        let state = tracker.rate_limit_state("P", "m").await.unwrap();
        assert_eq!(state.requests_remaining, state.requests_per_minute_limit);
        assert_eq!(state.consecutive_hits, 0);
        assert!(state.reset_time > Utc::now());
    }

    #[tokio::test]
    async fn test_nearly_drained_halves_rate_score() {
        let tracker = tracker();
        tracker
            .record_usage("P", "m", UsageRecord::success(100.0, 100, 0.0))
            .await;

        let before = tracker.health_score("P", "m").await;

        let headers = HashMap::from([
            ("x-ratelimit-limit-requests".to_string(), "100".to_string()),
            ("x-ratelimit-remaining-requests".to_string(), "5".to_string()),
        ]);
        tracker.update_rate_limit("P", "m", &headers).await;

        let after = tracker.health_score("P", "m").await;
        assert!((before - after - 0.20 * 0.5).abs() < 1e-9);
    }
}
