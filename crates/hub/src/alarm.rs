// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-re-arming maintenance timers.
//!
//! Each partition owns one alarm. The next wake-up time is written to the
//! partition's store under [`ALARM_KEY`] so a restarted process resumes the
//! schedule instead of waiting a full interval: an alarm that came due while
//! the process was down fires immediately.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SharedClock};
use crate::store::{get_json, put_json, SharedStore, Store};

/// Store key holding the next wake-up (epoch ms).
pub const ALARM_KEY: &str = "alarm";

/// Compute how long to wait before the first fire.
///
/// Never longer than `interval`, so a corrupted or far-future record cannot
/// stall maintenance.
pub async fn initial_delay(store: &dyn Store, clock: &dyn Clock, interval: Duration) -> Duration {
    let now = clock.now_ms();
    match get_json::<u64>(store, ALARM_KEY).await {
        Ok(Some(at)) => Duration::from_millis(at.saturating_sub(now)).min(interval),
        Ok(None) => {
            arm(store, clock, interval).await;
            interval
        }
        Err(e) => {
            tracing::warn!(err = %e, "unreadable alarm record, using full interval");
            interval
        }
    }
}

/// Persist the next wake-up as `now + interval`.
async fn arm(store: &dyn Store, clock: &dyn Clock, interval: Duration) {
    let next = clock.now_ms().saturating_add(interval.as_millis() as u64);
    if let Err(e) = put_json(store, ALARM_KEY, &next).await {
        tracing::warn!(err = %e, "failed to persist alarm");
    }
}

/// Remove the persisted wake-up so a restart does not resume this alarm.
pub async fn disarm(store: &dyn Store) -> anyhow::Result<bool> {
    store.delete(ALARM_KEY).await
}

/// Spawn a task that calls `fire` every `interval` until `shutdown`.
///
/// `fire` runs to completion before the alarm is re-armed, so a slow
/// maintenance pass delays the next one rather than overlapping it. A pass
/// that cancels `shutdown` itself ends the alarm without re-arming it.
pub fn spawn_alarm<F, Fut>(
    name: String,
    store: SharedStore,
    clock: SharedClock,
    interval: Duration,
    shutdown: CancellationToken,
    mut fire: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut delay = initial_delay(&*store, &*clock, interval).await;
        tracing::debug!(alarm = %name, first_in_ms = delay.as_millis() as u64, "alarm armed");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            fire().await;
            if shutdown.is_cancelled() {
                break;
            }
            arm(&*store, &*clock, interval).await;
            delay = interval;
        }

        tracing::debug!(alarm = %name, "alarm stopped");
    })
}

#[cfg(test)]
#[path = "alarm_tests.rs"]
mod tests;
