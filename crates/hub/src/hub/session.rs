// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::error::ErrorCode;
use crate::hub::protocol::{AgentStatus, ServerMessage};

/// What an agent last announced about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub agent_id: String,
    pub identity: Identity,
    pub connected_at: u64,
    pub last_ping_at: u64,
    pub status: AgentStatus,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Work that found no agent to take it yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    pub task_id: String,
    pub task_type: String,
    pub payload: Value,
    pub created_at: u64,
    pub retry_count: u32,
}

impl PendingTask {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Task {
            task_id: self.task_id.clone(),
            task_type: self.task_type.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Live session as listed by `GET /hub/agents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub channel_id: u64,
    #[serde(flatten)]
    pub session: Session,
}

/// One open agent channel.
pub(crate) struct Channel {
    pub id: u64,
    pub identity: Identity,
    pub connected_at: u64,
    pub last_ping_at: u64,
    pub session: Option<Session>,
    pub tx: mpsc::Sender<ServerMessage>,
    pub evict: CancellationToken,
}

impl Channel {
    /// Whether this channel may be handed new work.
    pub fn accepts_work(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.status.accepts_work())
    }

    /// Queue a message without waiting. A full or closed queue is a delivery
    /// failure; the message is dropped.
    pub fn send(&self, msg: ServerMessage) -> Result<(), ErrorCode> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(channel = self.id, "outbound queue full, dropping message");
                Err(ErrorCode::DeliveryFailed)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(channel = self.id, "outbound queue closed, dropping message");
                Err(ErrorCode::DeliveryFailed)
            }
        }
    }

    /// Stamp liveness on the channel and its session.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_ping_at = now_ms;
        if let Some(ref mut session) = self.session {
            session.last_ping_at = now_ms;
        }
    }
}
