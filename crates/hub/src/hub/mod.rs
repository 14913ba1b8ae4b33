// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session hub: the pool of live agent channels.
//!
//! All hub state sits behind one async mutex, so channel bookkeeping, task
//! dispatch, and maintenance are totally ordered. Outbound messages go through
//! bounded per-channel queues and never block the hub.

mod handler;
mod maintenance;
pub mod protocol;
pub mod session;

pub use maintenance::MaintenanceReport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::clock::SharedClock;
use crate::delegation::{Classifier, Delegation};
use crate::error::{storage_unavailable, ErrorCode};
use crate::hub::protocol::{AgentStatus, ServerMessage};
use crate::hub::session::{AgentView, Channel, PendingTask, Session};
use crate::records::{AlertRecord, RecordStore, TaskRecord};
use crate::store::{get_json, list_json, put_json, SharedStore};

/// Store key of the persisted pending-task list.
pub const PENDING_KEY: &str = "pending_tasks";

/// Store prefix of the persisted session directory.
pub const SESSION_PREFIX: &str = "session/";

/// Close reason sent when the hub evicts a channel.
pub const STALE_REASON: &str = "stale";

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub stale_after: Duration,
    pub max_retries: u32,
    pub channel_buffer: usize,
    pub snapshot_limit: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(120),
            max_retries: 3,
            channel_buffer: 64,
            snapshot_limit: 20,
        }
    }
}

/// Everything the hub talks to.
pub struct HubDeps {
    /// Store scoped to the hub's key range.
    pub store: SharedStore,
    pub clock: SharedClock,
    pub classifier: Arc<dyn Classifier>,
    pub records: Arc<dyn RecordStore>,
}

/// Receiving end of a freshly opened channel.
pub struct ChannelHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<ServerMessage>,
    /// Cancelled when the hub evicts this channel.
    pub evicted: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub sent_count: usize,
    pub task_id: String,
    pub queued: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertOutcome {
    pub sent_count: usize,
    pub alert_id: String,
}

#[derive(Default)]
struct HubState {
    channels: BTreeMap<u64, Channel>,
    pending: Vec<PendingTask>,
    /// Last persisted record per agent id, live or not.
    known: BTreeMap<String, Session>,
    next_id: u64,
}

pub struct Hub {
    state: Mutex<HubState>,
    store: SharedStore,
    clock: SharedClock,
    classifier: Arc<dyn Classifier>,
    records: Arc<dyn RecordStore>,
    settings: HubSettings,
}

impl Hub {
    /// Open the hub, reloading pending tasks and the session directory first.
    ///
    /// No channel can attach before recovery has finished.
    pub async fn open(deps: HubDeps, settings: HubSettings) -> anyhow::Result<Arc<Self>> {
        let pending: Vec<PendingTask> =
            get_json(&*deps.store, PENDING_KEY).await?.unwrap_or_default();
        let known: BTreeMap<String, Session> = list_json::<Session>(&*deps.store, SESSION_PREFIX)
            .await?
            .into_iter()
            .map(|(_, s)| (s.agent_id.clone(), s))
            .collect();
        tracing::info!(pending = pending.len(), known_agents = known.len(), "hub recovered");

        let state = HubState { pending, known, ..HubState::default() };
        Ok(Arc::new(Self {
            state: Mutex::new(state),
            store: deps.store,
            clock: deps.clock,
            classifier: deps.classifier,
            records: deps.records,
            settings,
        }))
    }

    async fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().await
    }

    /// Register an authenticated channel.
    pub async fn connect(&self, identity: Identity) -> ChannelHandle {
        let now = self.clock.now_ms();
        let (tx, rx) = mpsc::channel(self.settings.channel_buffer.max(1));
        let evicted = CancellationToken::new();

        let mut state = self.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        tracing::info!(
            channel = id,
            user = %identity.user_id,
            role = %identity.role,
            "channel open"
        );
        state.channels.insert(
            id,
            Channel {
                id,
                identity,
                connected_at: now,
                last_ping_at: now,
                session: None,
                tx,
                evict: evicted.clone(),
            },
        );
        ChannelHandle { id, rx, evicted }
    }

    /// Drop a channel. Its last session record is persisted as offline.
    pub async fn disconnect(&self, id: u64) {
        let mut state = self.lock().await;
        let Some(channel) = state.channels.remove(&id) else {
            return;
        };
        tracing::info!(channel = id, user = %channel.identity.user_id, "channel closed");
        if let Some(session) = channel.session {
            self.persist_offline(&mut state, session).await;
        }
    }

    async fn persist_offline(&self, state: &mut HubState, mut session: Session) {
        session.status = AgentStatus::Offline;
        let key = format!("{SESSION_PREFIX}{}", session.agent_id);
        if let Err(e) = put_json(&*self.store, &key, &session).await {
            storage_unavailable("persist offline session", e);
        }
        state.known.insert(session.agent_id.clone(), session);
    }

    async fn persist_pending(&self, state: &HubState) -> Result<(), ErrorCode> {
        put_json(&*self.store, PENDING_KEY, &state.pending)
            .await
            .map_err(|e| storage_unavailable("persist pending tasks", e))
    }

    /// Send a task to every channel that accepts work, optionally skipping
    /// one. Returns how many sends succeeded.
    fn fan_out(state: &HubState, task: &PendingTask, skip: Option<u64>) -> usize {
        let msg = task.to_message();
        state
            .channels
            .values()
            .filter(|c| Some(c.id) != skip && c.accepts_work())
            .filter(|c| c.send(msg.clone()).is_ok())
            .count()
    }

    /// Dispatch a task to every eligible agent, queueing it when none took it.
    pub async fn broadcast_task(
        &self,
        task_id: Option<String>,
        task_type: String,
        payload: Value,
    ) -> Result<BroadcastOutcome, ErrorCode> {
        let task = self.new_task(task_id, task_type, payload);
        let record = self.task_record(&task, None, None);
        let mut state = self.lock().await;
        let outcome = self.dispatch(&mut state, task, None).await?;
        drop(state);

        self.record_dispatch(record, &outcome).await;
        Ok(outcome)
    }

    /// Add a task straight to the pending list.
    pub async fn enqueue_task(
        &self,
        task_id: Option<String>,
        task_type: String,
        payload: Value,
    ) -> Result<String, ErrorCode> {
        let task = self.new_task(task_id, task_type, payload);
        let task_id = task.task_id.clone();
        let mut state = self.lock().await;
        state.pending.retain(|t| t.task_id != task_id);
        state.pending.push(task);
        self.persist_pending(&state).await?;
        tracing::info!(task_id = %task_id, "task enqueued");
        Ok(task_id)
    }

    fn new_task(&self, task_id: Option<String>, task_type: String, payload: Value) -> PendingTask {
        PendingTask {
            task_id: task_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            task_type,
            payload,
            created_at: self.clock.now_ms(),
            retry_count: 0,
        }
    }

    async fn dispatch(
        &self,
        state: &mut HubState,
        task: PendingTask,
        skip: Option<u64>,
    ) -> Result<BroadcastOutcome, ErrorCode> {
        let sent_count = Self::fan_out(state, &task, skip);
        let task_id = task.task_id.clone();
        let queued = sent_count == 0;
        if queued {
            state.pending.retain(|t| t.task_id != task_id);
            state.pending.push(task);
            self.persist_pending(state).await?;
            tracing::info!(task_id = %task_id, "no agent available, task queued");
        } else {
            tracing::debug!(task_id = %task_id, sent_count, "task dispatched");
        }
        Ok(BroadcastOutcome { sent_count, task_id, queued })
    }

    fn task_record(
        &self,
        task: &PendingTask,
        created_by: Option<String>,
        delegation: Option<Delegation>,
    ) -> TaskRecord {
        TaskRecord {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            created_at: task.created_at,
            created_by,
            delegation,
            status: String::new(),
            result: None,
            logs: None,
            completed_at: None,
        }
    }

    async fn record_dispatch(&self, mut record: TaskRecord, outcome: &BroadcastOutcome) {
        record.status = if outcome.queued { "queued" } else { "dispatched" }.to_owned();
        if let Err(e) = self.records.record_task(record).await {
            tracing::warn!(task_id = %outcome.task_id, err = %e, "failed to record task");
        }
    }

    /// Record an alert and push it to every open channel.
    pub async fn broadcast_alert(
        &self,
        severity: String,
        message: String,
        source: Option<String>,
    ) -> Result<AlertOutcome, ErrorCode> {
        let now = self.clock.now_ms();
        let alert_id = uuid::Uuid::new_v4().to_string();
        let record = AlertRecord {
            alert_id: alert_id.clone(),
            severity: severity.clone(),
            message: message.clone(),
            source: source.clone(),
            created_at: now,
            acknowledged_at: None,
        };
        self.records
            .record_alert(record)
            .await
            .map_err(|e| storage_unavailable("record alert", e))?;

        let msg = ServerMessage::Alert {
            alert_id: alert_id.clone(),
            severity,
            message,
            source,
            timestamp: now,
        };
        let state = self.lock().await;
        let sent_count = state.channels.values().filter(|c| c.send(msg.clone()).is_ok()).count();
        tracing::info!(alert_id = %alert_id, sent_count, "alert broadcast");
        Ok(AlertOutcome { sent_count, alert_id })
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<(), ErrorCode> {
        let found = self
            .records
            .acknowledge_alert(alert_id, self.clock.now_ms())
            .await
            .map_err(|e| storage_unavailable("acknowledge alert", e))?;
        if found {
            Ok(())
        } else {
            Err(ErrorCode::NotFound)
        }
    }

    /// Live sessions, in channel order.
    pub async fn agents(&self) -> Vec<AgentView> {
        let state = self.lock().await;
        state
            .channels
            .values()
            .filter_map(|c| {
                c.session.clone().map(|session| AgentView { channel_id: c.id, session })
            })
            .collect()
    }

    /// The persisted session directory.
    pub async fn known_agents(&self) -> Vec<Session> {
        self.lock().await.known.values().cloned().collect()
    }

    pub async fn pending(&self) -> Vec<PendingTask> {
        self.lock().await.pending.clone()
    }

    pub async fn channel_count(&self) -> usize {
        self.lock().await.channels.len()
    }

    /// Final persistence pass before the process exits.
    pub async fn shutdown(&self) -> Result<(), ErrorCode> {
        let state = self.lock().await;
        self.persist_pending(&state).await?;
        tracing::info!(pending = state.pending.len(), "hub state persisted");
        Ok(())
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
