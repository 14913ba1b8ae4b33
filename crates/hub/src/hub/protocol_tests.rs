// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{AgentStatus, ClientMessage, ServerMessage};

#[test]
fn parses_agent_status() -> anyhow::Result<()> {
    let text = r#"{"type":"agent-status","agentId":"a1","status":"idle","capabilities":["rust"]}"#;
    let msg = ClientMessage::parse(text).map_err(|e| anyhow::anyhow!(e.message))?;
    assert_eq!(
        msg,
        ClientMessage::AgentStatus {
            agent_id: "a1".to_owned(),
            status: AgentStatus::Idle,
            capabilities: vec!["rust".to_owned()],
            metadata: Default::default(),
        }
    );
    assert_eq!(msg.kind(), "agent-status");
    Ok(())
}

#[test]
fn parses_every_kind() -> anyhow::Result<()> {
    let frames = [
        json!({
            "type": "git-status",
            "repos": [{"name": "hub", "branch": "main", "lastCommit": "abc"}],
        }),
        json!({"type": "task-result", "taskId": "t1", "result": {"ok": true}, "status": "done"}),
        json!({"type": "pong"}),
        json!({
            "type": "observability-sync",
            "providers": [{"provider": "p", "status": "up", "latencyMs": 12.5}],
        }),
        json!({"type": "status-request"}),
        json!({"type": "chat", "payload": {"message": "hi"}}),
        json!({"type": "command", "payload": {"command": "deploy", "args": ["x"]}}),
    ];
    for frame in frames {
        let text = frame.to_string();
        let msg = ClientMessage::parse(&text).map_err(|e| anyhow::anyhow!("{text}: {e:?}"))?;
        assert_eq!(Some(msg.kind()), frame["type"].as_str());
    }
    Ok(())
}

#[yare::parameterized(
    not_json = { "{nope", "invalid JSON" },
    no_type = { r#"{"agentId":"a"}"#, "missing message type" },
    unknown_type = { r#"{"type":"teleport"}"#, "unknown message type" },
    bad_status = {
        r#"{"type":"agent-status","agentId":"a","status":"asleep"}"#,
        "invalid message"
    },
    missing_field = { r#"{"type":"task-result","taskId":"t1"}"#, "invalid message" },
    empty_agent = {
        r#"{"type":"agent-status","agentId":" ","status":"online"}"#,
        "invalid message"
    },
    empty_chat = { r#"{"type":"chat","payload":{"message":""}}"#, "invalid message" },
    empty_command = { r#"{"type":"command","payload":{"command":"  "}}"#, "invalid message" },
)]
fn rejects_invalid_frames(text: &str, message: &str) {
    let err = ClientMessage::parse(text).err().map(|e| e.message);
    assert_eq!(err.as_deref(), Some(message));
}

#[test]
fn oversized_instruction_is_rejected() {
    let message = "x".repeat(super::MAX_INSTRUCTION_LEN + 1);
    let text = json!({"type": "chat", "payload": {"message": message}}).to_string();
    assert!(ClientMessage::parse(&text).is_err());
}

#[test]
fn server_message_wire_shape() -> anyhow::Result<()> {
    let created = ServerMessage::TaskCreated {
        task_id: "t1".to_owned(),
        agent: "coder".to_owned(),
        confidence: 0.5,
        requires_consensus: true,
    };
    assert_eq!(
        serde_json::to_value(&created)?,
        json!({
            "type": "task_created",
            "taskId": "t1",
            "agent": "coder",
            "confidence": 0.5,
            "requiresConsensus": true,
        })
    );

    let ack = ServerMessage::ack("agent-status", None);
    assert_eq!(serde_json::to_value(&ack)?, json!({"type": "ack", "forType": "agent-status"}));

    let err = ServerMessage::error("boom");
    assert_eq!(serde_json::to_value(&err)?, json!({"type": "error", "message": "boom"}));
    Ok(())
}

#[yare::parameterized(
    online = { AgentStatus::Online, true },
    idle = { AgentStatus::Idle, true },
    busy = { AgentStatus::Busy, false },
    offline = { AgentStatus::Offline, false },
)]
fn work_eligibility(status: AgentStatus, eligible: bool) {
    assert_eq!(status.accepts_work(), eligible);
}
