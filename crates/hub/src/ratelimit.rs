// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort per-key request throttling.
//!
//! Counters live only in memory. A restart forgets every count and traffic is
//! admitted again (fail-open). Keys are spread over a fixed number of shards by
//! a stable hash; each shard is a plain map behind its own mutex, so one key's
//! checks are serialized while different shards proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::ErrorCode;

/// Eviction thresholds for one shard.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sweep expired counters every this many requests.
    pub sweep_every: u64,
    /// Sweep whenever the counter map grows past this size.
    pub sweep_threshold: usize,
    /// Clear the whole map if it is still this large after sweeping.
    pub hard_cap: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { sweep_every: 1000, sweep_threshold: 10_000, hard_cap: 100_000 }
    }
}

/// Body of `POST /ratelimit/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub key: String,
    pub limit: u64,
    pub ttl_sec: u64,
    pub window_start_sec: u64,
    pub window_sec: u64,
}

impl CheckRequest {
    /// A zero `limit` is valid and denies every request.
    fn validate(&self) -> Result<(), ErrorCode> {
        if self.key.is_empty() || self.ttl_sec == 0 || self.window_sec == 0 {
            return Err(ErrorCode::BadRequest);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub allowed: bool,
    pub remaining: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at_ms: u64,
}

/// One shard of counters.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: HashMap<String, Counter>,
    requests: u64,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { counters: HashMap::new(), requests: 0, config }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Count one request against `req.key`.
    pub fn check(&mut self, req: &CheckRequest, now_ms: u64) -> CheckOutcome {
        self.maintain(now_ms);

        let current = match self.counters.get(&req.key) {
            Some(c) if c.expires_at_ms > now_ms => c.count,
            _ => 0,
        };

        if current >= req.limit {
            let window_end_ms =
                req.window_start_sec.saturating_add(req.window_sec).saturating_mul(1000);
            let wait_ms = window_end_ms.saturating_sub(now_ms);
            let retry_after = wait_ms.div_ceil(1000).max(1);
            return CheckOutcome { allowed: false, remaining: 0, retry_after: Some(retry_after) };
        }

        let count = current + 1;
        let expires_at_ms = now_ms.saturating_add(req.ttl_sec.saturating_mul(1000));
        self.counters.insert(req.key.clone(), Counter { count, expires_at_ms });
        CheckOutcome { allowed: true, remaining: req.limit - count, retry_after: None }
    }

    /// Drop expired counters. Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at_ms > now_ms);
        before - self.counters.len()
    }

    fn maintain(&mut self, now_ms: u64) {
        self.requests = self.requests.wrapping_add(1);
        let due = self.config.sweep_every > 0 && self.requests % self.config.sweep_every == 0;
        if !due && self.counters.len() <= self.config.sweep_threshold {
            return;
        }

        let removed = self.sweep(now_ms);
        if removed > 0 {
            tracing::debug!(removed, remaining = self.counters.len(), "rate counters swept");
        }
        if self.counters.len() >= self.config.hard_cap {
            tracing::warn!(size = self.counters.len(), "rate counter map over hard cap, clearing");
            self.counters.clear();
        }
    }

    /// Forget every counter, as a process restart would.
    pub fn clear(&mut self) {
        self.counters.clear();
    }
}

/// Rate limiter sharded by a stable hash of the key.
pub struct ShardedRateLimiter {
    shards: Vec<Mutex<RateLimiter>>,
    clock: SharedClock,
}

impl ShardedRateLimiter {
    pub fn new(shard_count: usize, config: RateLimitConfig, clock: SharedClock) -> Self {
        let shards =
            (0..shard_count.max(1)).map(|_| Mutex::new(RateLimiter::new(config))).collect();
        Self { shards, clock }
    }

    fn shard_for(&self, key: &str) -> &Mutex<RateLimiter> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn check(&self, req: &CheckRequest) -> Result<CheckOutcome, ErrorCode> {
        req.validate()?;
        let now = self.clock.now_ms();
        Ok(self.shard_for(&req.key).lock().check(req, now))
    }

    /// Total live counters across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every counter in every shard.
    pub fn reset(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
