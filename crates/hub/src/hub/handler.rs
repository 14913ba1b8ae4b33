// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message handling for agent channels.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::storage_unavailable;
use crate::hub::protocol::{AgentStatus, ClientMessage, ServerMessage};
use crate::hub::session::Session;
use crate::hub::{Hub, SESSION_PREFIX};
use crate::records::TaskOutcome;
use crate::store::put_json;

/// A routed `chat` or `command` instruction.
struct Instruction {
    task_type: &'static str,
    text: String,
    payload: Value,
}

impl Hub {
    /// Handle one text frame from channel `id`.
    ///
    /// Every failure is answered with an `error` message on the same channel;
    /// nothing here closes the channel.
    pub async fn handle_text(&self, id: u64, text: &str) {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(channel = id, error = %err.message, "rejected frame");
                self.reply(id, err.into_message()).await;
                return;
            }
        };
        tracing::debug!(channel = id, kind = msg.kind(), "inbound message");

        match msg {
            ClientMessage::AgentStatus { agent_id, status, capabilities, metadata } => {
                self.on_agent_status(id, agent_id, status, capabilities, metadata).await;
            }
            ClientMessage::Pong { .. } => {
                let now = self.clock.now_ms();
                if let Some(channel) = self.lock().await.channels.get_mut(&id) {
                    channel.touch(now);
                }
            }
            ClientMessage::GitStatus { repos } => {
                let agent = self.agent_label(id).await;
                let now = self.clock.now_ms();
                match self.records.upsert_repos(&agent, &repos, now).await {
                    Ok(()) => {
                        let details = json!({ "repos": repos.len() });
                        self.reply(id, ServerMessage::ack("git-status", Some(details))).await;
                    }
                    Err(e) => self.storage_error(id, "record repos", e).await,
                }
            }
            ClientMessage::ObservabilitySync { providers, .. } => {
                let now = self.clock.now_ms();
                match self.records.record_provider_health(&providers, now).await {
                    Ok(()) => {
                        let details = json!({ "providers": providers.len() });
                        self.reply(id, ServerMessage::ack("observability-sync", Some(details)))
                            .await;
                    }
                    Err(e) => self.storage_error(id, "record provider health", e).await,
                }
            }
            ClientMessage::TaskResult { task_id, result, status, logs } => {
                self.on_task_result(id, task_id, result, status, logs).await;
            }
            ClientMessage::StatusRequest {} => self.send_snapshots(id).await,
            ClientMessage::Chat { payload } => {
                let instruction = Instruction {
                    task_type: "chat",
                    text: payload.message.clone(),
                    payload: json!({ "message": payload.message, "context": payload.context }),
                };
                self.route_instruction(id, instruction).await;
            }
            ClientMessage::Command { payload } => {
                let instruction = Instruction {
                    task_type: "command",
                    text: payload.command.clone(),
                    payload: json!({ "command": payload.command, "args": payload.args }),
                };
                self.route_instruction(id, instruction).await;
            }
        }
    }

    async fn reply(&self, id: u64, msg: ServerMessage) {
        let state = self.lock().await;
        if let Some(channel) = state.channels.get(&id) {
            let _ = channel.send(msg);
        }
    }

    async fn storage_error(&self, id: u64, op: &'static str, err: anyhow::Error) {
        let code = storage_unavailable(op, err);
        self.reply(id, ServerMessage::error(code.default_message())).await;
    }

    /// Agent id of the channel's session, else its authenticated user id.
    async fn agent_label(&self, id: u64) -> String {
        let state = self.lock().await;
        state
            .channels
            .get(&id)
            .map(|c| match c.session {
                Some(ref s) => s.agent_id.clone(),
                None => c.identity.user_id.clone(),
            })
            .unwrap_or_default()
    }

    async fn on_agent_status(
        &self,
        id: u64,
        agent_id: String,
        status: AgentStatus,
        capabilities: Vec<String>,
        metadata: BTreeMap<String, Value>,
    ) {
        let now = self.clock.now_ms();
        let mut state = self.lock().await;
        let Some(channel) = state.channels.get_mut(&id) else {
            return;
        };

        channel.last_ping_at = now;
        let session = Session {
            agent_id,
            identity: channel.identity.clone(),
            connected_at: channel.connected_at,
            last_ping_at: now,
            status,
            capabilities: capabilities.into_iter().collect(),
            metadata,
        };
        channel.session = Some(session.clone());

        let key = format!("{SESSION_PREFIX}{}", session.agent_id);
        let reply = match put_json(&*self.store, &key, &session).await {
            Ok(()) => {
                tracing::info!(channel = id, agent = %session.agent_id, ?status, "agent status");
                let details = json!({ "agentId": session.agent_id, "status": status });
                state.known.insert(session.agent_id.clone(), session);
                ServerMessage::ack("agent-status", Some(details))
            }
            Err(e) => {
                ServerMessage::error(storage_unavailable("persist session", e).default_message())
            }
        };
        if let Some(channel) = state.channels.get(&id) {
            let _ = channel.send(reply);
        }
    }

    async fn on_task_result(
        &self,
        id: u64,
        task_id: String,
        result: Value,
        status: String,
        logs: Option<Vec<String>>,
    ) {
        let outcome = TaskOutcome { status: status.clone(), result, logs, at: self.clock.now_ms() };
        if let Err(e) = self.records.record_task_result(&task_id, outcome).await {
            self.storage_error(id, "record task result", e).await;
            return;
        }

        let mut state = self.lock().await;
        let before = state.pending.len();
        state.pending.retain(|t| t.task_id != task_id);
        if state.pending.len() != before {
            tracing::info!(task_id = %task_id, "pending task resolved by result");
            if let Err(code) = self.persist_pending(&state).await {
                tracing::warn!(task_id = %task_id, %code, "pending list not persisted");
            }
        }
        tracing::info!(channel = id, task_id = %task_id, status = %status, "task result");
        if let Some(channel) = state.channels.get(&id) {
            let details = json!({ "taskId": task_id });
            let _ = channel.send(ServerMessage::ack("task-result", Some(details)));
        }
    }

    /// Send each snapshot category as its own message. A failing category is
    /// reported and skipped.
    async fn send_snapshots(&self, id: u64) {
        let limit = self.settings.snapshot_limit;
        let categories: [(&str, anyhow::Result<Value>); 4] = [
            ("tasks", to_items(self.records.recent_tasks(limit).await)),
            ("repos", to_items(self.records.repos(limit).await)),
            ("alerts", to_items(self.records.unacknowledged_alerts(limit).await)),
            ("providers", to_items(self.records.provider_health(limit).await)),
        ];

        for (category, items) in categories {
            let msg = match items {
                Ok(items) => ServerMessage::Snapshot { category: category.to_owned(), items },
                Err(e) => {
                    tracing::warn!(channel = id, category, err = %e, "snapshot category failed");
                    ServerMessage::Error {
                        message: "snapshot unavailable".to_owned(),
                        details: Some(category.to_owned()),
                    }
                }
            };
            self.reply(id, msg).await;
        }
    }

    /// Classify an instruction and dispatch it as a task to the other agents.
    async fn route_instruction(&self, id: u64, instruction: Instruction) {
        let Some(user_id) = self.lock().await.channels.get(&id).map(|c| c.identity.user_id.clone())
        else {
            return;
        };

        let delegation = match self.classifier.classify(&instruction.text, &user_id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(channel = id, err = %format!("{e:#}"), "classifier failed");
                self.reply(id, ServerMessage::error("classification failed")).await;
                return;
            }
        };
        if delegation.requires_consensus {
            tracing::info!(
                request_id = %delegation.request_id,
                agent = %delegation.agent,
                confidence = delegation.confidence,
                "low-confidence routing flagged for consensus"
            );
        }

        let mut payload = instruction.payload;
        if let Value::Object(ref mut map) = payload {
            map.insert("requestedBy".to_owned(), Value::String(user_id.clone()));
            let routed = serde_json::to_value(&delegation).unwrap_or_default();
            map.insert("delegation".to_owned(), routed);
        }
        let task = self.new_task(None, instruction.task_type.to_owned(), payload);
        let record = self.task_record(&task, Some(user_id), Some(delegation.clone()));

        let mut state = self.lock().await;
        let outcome = match self.dispatch(&mut state, task, Some(id)).await {
            Ok(outcome) => outcome,
            Err(code) => {
                if let Some(channel) = state.channels.get(&id) {
                    let _ = channel.send(ServerMessage::error(code.default_message()));
                }
                return;
            }
        };

        if let Some(channel) = state.channels.get(&id) {
            let details = json!({
                "taskId": outcome.task_id,
                "agent": delegation.agent,
                "confidence": delegation.confidence,
                "requiresConsensus": delegation.requires_consensus,
                "sentCount": outcome.sent_count,
                "queued": outcome.queued,
            });
            let _ = channel.send(ServerMessage::ack(instruction.task_type, Some(details)));
            let _ = channel.send(ServerMessage::TaskCreated {
                task_id: outcome.task_id.clone(),
                agent: delegation.agent.clone(),
                confidence: delegation.confidence,
                requires_consensus: delegation.requires_consensus,
            });
        }
        drop(state);

        self.record_dispatch(record, &outcome).await;
    }
}

fn to_items<T: serde::Serialize>(rows: anyhow::Result<Vec<T>>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(rows?)?)
}
