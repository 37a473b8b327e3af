//! Adaptive token-bucket rate limiter
//!
//! One bucket per logical target. Tokens refill continuously at the bucket's
//! current rate and are capped at the burst capacity. Outcome feedback moves
//! the rate between `min_rate` and `max_rate`.
//!
//! A remote rate-limit response is handled once, by the immediate decrease.
//! Inside the current window it only vetoes an increase; it is neither an
//! error sample nor a second decrease when the window closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use collector_core::config::RateLimiterConfig;
use metrics::gauge;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    current_rate: f64,
    success_count: u64,
    error_count: u64,
    rate_limit_hits: u64,
    last_adjustment: Instant,
    total_rate_limit_hits: u64,
}

impl BucketState {
    fn new(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst_capacity,
            last_refill: now,
            current_rate: config.initial_rate,
            success_count: 0,
            error_count: 0,
            rate_limit_hits: 0,
            last_adjustment: now,
            total_rate_limit_hits: 0,
        }
    }

    fn refill(&mut self, now: Instant, burst_capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.current_rate).min(burst_capacity);
        self.last_refill = now;
    }

    fn samples(&self) -> u64 {
        self.success_count + self.error_count
    }

    fn success_rate(&self) -> f64 {
        if self.samples() == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.samples() as f64
    }

    fn reset_window(&mut self, now: Instant) {
        self.success_count = 0;
        self.error_count = 0;
        self.rate_limit_hits = 0;
        self.last_adjustment = now;
    }
}

/// Point-in-time view of one bucket
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub target: String,
    pub tokens: f64,
    /// Tokens per second
    pub current_rate: f64,
    /// Outcomes of the current adjustment window
    pub success_count: u64,
    pub error_count: u64,
    pub rate_limit_hits: u64,
    /// Rate-limit responses since the bucket was created
    pub total_rate_limit_hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Error,
}

/// 自适应令牌桶限流器
///
/// Cloning shares the buckets. A bucket is created on first use of its target
/// with `initial_rate` and a full burst.
#[derive(Debug, Clone)]
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        info!(
            initial_rate = config.initial_rate,
            min_rate = config.min_rate,
            max_rate = config.max_rate,
            burst_capacity = config.burst_capacity,
            "Creating adaptive rate limiter"
        );
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Waits for a token up to `timeout`; returns false when none became available
    pub async fn acquire(&self, target: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            {
                let mut buckets = self.buckets.lock().await;
                let state = buckets
                    .entry(target.to_string())
                    .or_insert_with(|| BucketState::new(&self.config, now));
                state.refill(now, self.config.burst_capacity);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
            }

            if now >= deadline {
                debug!(target = target, "Rate limiter acquire timed out");
                return false;
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.config.poll_interval().min(remaining)).await;
        }
    }

    /// Non-consuming check used for dispatch admission
    pub async fn has_capacity(&self, target: &str) -> bool {
        self.available_tokens(target).await >= 1.0
    }

    /// Tokens currently in the bucket after refill
    pub async fn available_tokens(&self, target: &str) -> f64 {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let state = buckets
            .entry(target.to_string())
            .or_insert_with(|| BucketState::new(&self.config, now));
        state.refill(now, self.config.burst_capacity);
        state.tokens
    }

    pub async fn current_rate(&self, target: &str) -> f64 {
        let buckets = self.buckets.lock().await;
        buckets
            .get(target)
            .map(|s| s.current_rate)
            .unwrap_or(self.config.initial_rate)
    }

    pub async fn record_success(&self, target: &str) {
        self.record(target, Outcome::Success).await;
    }

    /// Counts a failed call towards the current window
    pub async fn record_error(&self, target: &str) {
        self.record(target, Outcome::Error).await;
    }

    /// Remote refused admission: decrease immediately, outside the periodic window
    pub async fn record_rate_limited(&self, target: &str) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let state = buckets
            .entry(target.to_string())
            .or_insert_with(|| BucketState::new(&self.config, now));
        state.refill(now, self.config.burst_capacity);
        state.rate_limit_hits += 1;
        state.total_rate_limit_hits += 1;

        let previous = state.current_rate;
        state.current_rate = (previous * self.config.decrease_factor).max(self.config.min_rate);

        warn!(
            target = target,
            previous_rate = previous,
            current_rate = state.current_rate,
            "Rate limited by remote, decreasing rate"
        );
        gauge!("collector_rate_limiter_current_rate", "target" => target.to_string())
            .set(state.current_rate);
    }

    async fn record(&self, target: &str, outcome: Outcome) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let state = buckets
            .entry(target.to_string())
            .or_insert_with(|| BucketState::new(&self.config, now));
        match outcome {
            Outcome::Success => state.success_count += 1,
            Outcome::Error => state.error_count += 1,
        }
        self.maybe_adjust(target, state, now);
    }

    fn maybe_adjust(&self, target: &str, state: &mut BucketState, now: Instant) {
        if now.saturating_duration_since(state.last_adjustment) < self.config.adjustment_window() {
            return;
        }
        if state.samples() < self.config.min_samples {
            return;
        }

        // Refill at the old rate up to the switch point
        state.refill(now, self.config.burst_capacity);

        let success_rate = state.success_rate();
        let previous = state.current_rate;
        if success_rate > self.config.increase_threshold && state.rate_limit_hits == 0 {
            state.current_rate = (previous * self.config.increase_factor).min(self.config.max_rate);
        } else if success_rate < self.config.decrease_threshold {
            state.current_rate = (previous * self.config.decrease_factor).max(self.config.min_rate);
        }

        if (state.current_rate - previous).abs() > f64::EPSILON {
            info!(
                target = target,
                success_rate = success_rate,
                previous_rate = previous,
                current_rate = state.current_rate,
                "Adjusted rate limit"
            );
            gauge!("collector_rate_limiter_current_rate", "target" => target.to_string())
                .set(state.current_rate);
        }
        state.reset_window(now);
    }

    pub async fn snapshot(&self, target: &str) -> Option<RateLimiterSnapshot> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let state = buckets.get_mut(target)?;
        state.refill(now, self.config.burst_capacity);
        Some(Self::to_snapshot(target, state))
    }

    pub async fn snapshots(&self) -> Vec<RateLimiterSnapshot> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let mut snapshots: Vec<_> = buckets
            .iter_mut()
            .map(|(target, state)| {
                state.refill(now, self.config.burst_capacity);
                Self::to_snapshot(target, state)
            })
            .collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }

    fn to_snapshot(target: &str, state: &BucketState) -> RateLimiterSnapshot {
        RateLimiterSnapshot {
            target: target.to_string(),
            tokens: state.tokens,
            current_rate: state.current_rate,
            success_count: state.success_count,
            error_count: state.error_count,
            rate_limit_hits: state.rate_limit_hits,
            total_rate_limit_hits: state.total_rate_limit_hits,
        }
    }
}
