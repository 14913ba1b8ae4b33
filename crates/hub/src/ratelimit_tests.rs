// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{CheckRequest, RateLimitConfig, RateLimiter, ShardedRateLimiter};
use crate::clock::ManualClock;
use crate::error::ErrorCode;

const NOW_SEC: u64 = 1_700_000_000;

fn request(key: &str, limit: u64) -> CheckRequest {
    CheckRequest {
        key: key.to_owned(),
        limit,
        ttl_sec: 60,
        window_start_sec: NOW_SEC,
        window_sec: 60,
    }
}

#[test]
fn counts_down_then_denies() -> anyhow::Result<()> {
    let clock = ManualClock::new(NOW_SEC * 1000);
    let limiter = ShardedRateLimiter::new(4, RateLimitConfig::default(), clock);
    let req = request("ip:1.2.3.4", 5);

    let remaining: Vec<u64> =
        (0..5).map(|_| limiter.check(&req).map(|o| o.remaining)).collect::<Result<_, _>>()?;
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let denied = limiter.check(&req)?;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.retry_after, Some(60));
    Ok(())
}

#[test]
fn retry_after_rounds_up_and_is_at_least_one() -> anyhow::Result<()> {
    let clock = ManualClock::new(NOW_SEC * 1000);
    let limiter = ShardedRateLimiter::new(1, RateLimitConfig::default(), clock.clone());
    let mut req = request("k", 1);
    req.ttl_sec = 3600;
    limiter.check(&req)?;

    clock.advance(Duration::from_millis(59_500));
    assert_eq!(limiter.check(&req)?.retry_after, Some(1));

    // Window already over but the counter outlives it.
    clock.advance(Duration::from_secs(30));
    assert_eq!(limiter.check(&req)?.retry_after, Some(1));
    Ok(())
}

#[test]
fn counter_resets_after_ttl() -> anyhow::Result<()> {
    let clock = ManualClock::new(NOW_SEC * 1000);
    let limiter = ShardedRateLimiter::new(2, RateLimitConfig::default(), clock.clone());
    let req = request("k", 1);
    assert!(limiter.check(&req)?.allowed);
    assert!(!limiter.check(&req)?.allowed);

    clock.advance(Duration::from_secs(60));
    let outcome = limiter.check(&req)?;
    assert!(outcome.allowed);
    assert_eq!(outcome.remaining, 0);
    Ok(())
}

#[test]
fn keys_are_independent() -> anyhow::Result<()> {
    let limiter =
        ShardedRateLimiter::new(16, RateLimitConfig::default(), ManualClock::new(NOW_SEC * 1000));
    assert!(limiter.check(&request("a", 1))?.allowed);
    assert!(!limiter.check(&request("a", 1))?.allowed);
    assert!(limiter.check(&request("b", 1))?.allowed);
    assert_eq!(limiter.len(), 2);
    Ok(())
}

#[test]
fn restart_fails_open() -> anyhow::Result<()> {
    let limiter =
        ShardedRateLimiter::new(4, RateLimitConfig::default(), ManualClock::new(NOW_SEC * 1000));
    let req = request("k", 1);
    limiter.check(&req)?;
    assert!(!limiter.check(&req)?.allowed);

    limiter.reset();
    assert!(limiter.is_empty());
    assert!(limiter.check(&req)?.allowed);
    Ok(())
}

#[test]
fn zero_limit_denies_without_counting() -> anyhow::Result<()> {
    let clock = ManualClock::new((NOW_SEC + 20) * 1000);
    let limiter = ShardedRateLimiter::new(1, RateLimitConfig::default(), clock);
    let req = request("k", 0);

    for _ in 0..3 {
        let denied = limiter.check(&req)?;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(40));
    }
    assert!(limiter.is_empty());
    Ok(())
}

#[yare::parameterized(
    empty_key = { "", 1, 60, 60 },
    zero_ttl = { "k", 1, 0, 60 },
    zero_window = { "k", 1, 60, 0 },
)]
fn rejects_invalid_requests(key: &str, limit: u64, ttl_sec: u64, window_sec: u64) {
    let limiter = ShardedRateLimiter::new(1, RateLimitConfig::default(), ManualClock::new(0));
    let req = CheckRequest { key: key.to_owned(), limit, ttl_sec, window_start_sec: 0, window_sec };
    assert_eq!(limiter.check(&req).err(), Some(ErrorCode::BadRequest));
}

#[test]
fn periodic_sweep_evicts_expired_counters() {
    let config = RateLimitConfig { sweep_every: 3, sweep_threshold: 1000, hard_cap: 1000 };
    let mut shard = RateLimiter::new(config);
    let mut req = request("old", 10);
    req.ttl_sec = 1;
    shard.check(&req, 0);
    assert_eq!(shard.len(), 1);

    shard.check(&request("a", 10), 5_000);
    assert_eq!(shard.len(), 2);
    // Third request triggers the sweep before counting.
    shard.check(&request("b", 10), 5_000);
    assert_eq!(shard.len(), 2);
}

#[test]
fn hard_cap_clears_everything() {
    let config = RateLimitConfig { sweep_every: 1_000_000, sweep_threshold: 2, hard_cap: 3 };
    let mut shard = RateLimiter::new(config);
    for key in ["a", "b", "c"] {
        shard.check(&request(key, 10), NOW_SEC * 1000);
    }
    assert_eq!(shard.len(), 3);

    // Map is over the threshold and nothing has expired, so the cap clears it.
    let outcome = shard.check(&request("d", 10), NOW_SEC * 1000);
    assert!(outcome.allowed);
    assert_eq!(shard.len(), 1);
}

#[test]
fn outcome_wire_shape() -> anyhow::Result<()> {
    let limiter = ShardedRateLimiter::new(1, RateLimitConfig::default(), ManualClock::new(0));
    let mut req = request("k", 1);
    req.window_start_sec = 0;
    let allowed = serde_json::to_value(limiter.check(&req)?)?;
    assert_eq!(allowed, serde_json::json!({ "allowed": true, "remaining": 0 }));

    let denied = serde_json::to_value(limiter.check(&req)?)?;
    assert_eq!(denied, serde_json::json!({ "allowed": false, "remaining": 0, "retryAfter": 60 }));
    Ok(())
}
