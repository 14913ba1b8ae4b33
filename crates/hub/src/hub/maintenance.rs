// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::hub::protocol::ServerMessage;
use crate::hub::Hub;

/// What one maintenance pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub pinged: usize,
    pub evicted: usize,
    pub redelivered: usize,
    pub dropped: usize,
    pub pending: usize,
}

impl Hub {
    /// One maintenance pass: ping, evict stale channels, redeliver pending
    /// tasks, then persist the pending list.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = self.clock.now_ms();
        let stale_ms = self.settings.stale_after.as_millis() as u64;
        let mut report = MaintenanceReport::default();
        let mut state = self.lock().await;

        let ping = ServerMessage::Ping { timestamp: now };
        report.pinged = state.channels.values().filter(|c| c.send(ping.clone()).is_ok()).count();

        let stale: Vec<u64> = state
            .channels
            .values()
            .filter(|c| now.saturating_sub(c.last_ping_at) > stale_ms)
            .map(|c| c.id)
            .collect();
        for id in stale {
            let Some(channel) = state.channels.remove(&id) else {
                continue;
            };
            tracing::warn!(
                channel = id,
                user = %channel.identity.user_id,
                idle_ms = now.saturating_sub(channel.last_ping_at),
                "evicting stale channel"
            );
            channel.evict.cancel();
            if let Some(session) = channel.session {
                self.persist_offline(&mut state, session).await;
            }
            report.evicted += 1;
        }

        let max_retries = self.settings.max_retries;
        let pending = std::mem::take(&mut state.pending);
        let mut kept = Vec::with_capacity(pending.len());
        for mut task in pending {
            if task.retry_count >= max_retries {
                tracing::warn!(
                    task_id = %task.task_id,
                    retries = task.retry_count,
                    "dropping task"
                );
                report.dropped += 1;
                continue;
            }
            let Some(target) = state.channels.values().find(|c| c.accepts_work()) else {
                kept.push(task);
                continue;
            };

            task.retry_count += 1;
            if target.send(task.to_message()).is_ok() {
                tracing::info!(
                    task_id = %task.task_id,
                    channel = target.id,
                    "pending task redelivered"
                );
                report.redelivered += 1;
            } else if task.retry_count >= max_retries {
                tracing::warn!(
                    task_id = %task.task_id,
                    retries = task.retry_count,
                    "dropping task"
                );
                report.dropped += 1;
            } else {
                kept.push(task);
            }
        }
        state.pending = kept;
        report.pending = state.pending.len();

        if let Err(code) = self.persist_pending(&state).await {
            tracing::warn!(%code, "pending list not persisted after maintenance");
        }
        tracing::debug!(?report, "hub maintenance");
        report
    }
}
