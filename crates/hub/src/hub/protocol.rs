// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent channel message types.
//!
//! Messages are internally-tagged JSON objects (`{"type": "agent-status", ...}`).
//! Inbound frames are decoded and validated here, at the boundary; anything
//! that fails becomes a [`ProtocolError`] the hub answers with an `error`
//! message on the same channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted `chat` message or `command` string, in bytes.
pub const MAX_INSTRUCTION_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Idle,
}

impl AgentStatus {
    /// Whether an agent in this status may be handed new work.
    pub fn accepts_work(self) -> bool {
        matches!(self, Self::Online | Self::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ahead: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behind: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

// ---------------------------------------------------------------------------
// Agent -> Hub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    AgentStatus {
        agent_id: String,
        status: AgentStatus,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    GitStatus {
        repos: Vec<RepoStatus>,
    },
    TaskResult {
        task_id: String,
        result: Value,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logs: Option<Vec<String>>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    ObservabilitySync {
        providers: Vec<ProviderHealth>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<Value>,
    },
    StatusRequest {},
    Chat {
        payload: ChatPayload,
    },
    Command {
        payload: CommandPayload,
    },
}

const CLIENT_TYPES: &[&str] = &[
    "agent-status",
    "git-status",
    "task-result",
    "pong",
    "observability-sync",
    "status-request",
    "chat",
    "command",
];

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub message: String,
    pub details: Option<String>,
}

impl ProtocolError {
    fn new(message: &str) -> Self {
        Self { message: message.to_owned(), details: None }
    }

    fn with_details(message: &str, details: impl Into<String>) -> Self {
        Self { message: message.to_owned(), details: Some(details.into()) }
    }

    pub fn into_message(self) -> ServerMessage {
        ServerMessage::Error { message: self.message, details: self.details }
    }
}

impl ClientMessage {
    /// Decode and validate one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::with_details("invalid JSON", e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::new("missing message type"))?;
        if !CLIENT_TYPES.contains(&kind) {
            return Err(ProtocolError::with_details("unknown message type", kind));
        }

        let msg: Self = serde_json::from_value(value)
            .map_err(|e| ProtocolError::with_details("invalid message", e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    /// Wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStatus { .. } => "agent-status",
            Self::GitStatus { .. } => "git-status",
            Self::TaskResult { .. } => "task-result",
            Self::Pong { .. } => "pong",
            Self::ObservabilitySync { .. } => "observability-sync",
            Self::StatusRequest {} => "status-request",
            Self::Chat { .. } => "chat",
            Self::Command { .. } => "command",
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let invalid = |detail: &str| -> Result<(), ProtocolError> {
            Err(ProtocolError::with_details("invalid message", detail))
        };
        match self {
            Self::AgentStatus { agent_id, .. } if agent_id.trim().is_empty() => {
                invalid("agentId must not be empty")
            }
            Self::GitStatus { repos } if repos.iter().any(|r| r.name.is_empty()) => {
                invalid("repo name must not be empty")
            }
            Self::TaskResult { task_id, .. } if task_id.is_empty() => {
                invalid("taskId must not be empty")
            }
            Self::TaskResult { status, .. } if status.is_empty() => {
                invalid("status must not be empty")
            }
            Self::ObservabilitySync { providers, .. }
                if providers.iter().any(|p| p.provider.is_empty()) =>
            {
                invalid("provider must not be empty")
            }
            Self::Chat { payload } => instruction(&payload.message, "message"),
            Self::Command { payload } => instruction(&payload.command, "command"),
            _ => Ok(()),
        }
    }
}

fn instruction(text: &str, field: &str) -> Result<(), ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::with_details("invalid message", format!("{field} is empty")));
    }
    if text.len() > MAX_INSTRUCTION_LEN {
        return Err(ProtocolError::with_details("invalid message", format!("{field} too long")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hub -> Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Task {
        task_id: String,
        task_type: String,
        payload: Value,
    },
    Ping {
        timestamp: u64,
    },
    Ack {
        for_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Alert {
        alert_id: String,
        severity: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        timestamp: u64,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    TaskCreated {
        task_id: String,
        agent: String,
        confidence: f64,
        requires_consensus: bool,
    },
    Snapshot {
        category: String,
        items: Value,
    },
}

impl ServerMessage {
    pub fn ack(for_type: &str, details: Option<Value>) -> Self {
        Self::Ack { for_type: for_type.to_owned(), details }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into(), details: None }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
