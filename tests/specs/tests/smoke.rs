// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `agenthub` binary, including
//! restarts against the same state directory.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Method;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use agenthub_specs::HubProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let hub = HubProcess::start()?;
    hub.wait_healthy(TIMEOUT).await?;

    let resp: Value = reqwest::get(format!("{}/health", hub.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["agents"], 0);
    assert_eq!(resp["pendingTasks"], 0);
    Ok(())
}

#[tokio::test]
async fn control_routes_need_bearer() -> anyhow::Result<()> {
    let hub = HubProcess::build().auth_token("smoke-secret").spawn()?;
    hub.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let anonymous = client.get(format!("{}/hub/pending", hub.base_url())).send().await?;
    assert_eq!(anonymous.status().as_u16(), 401);

    let authed = hub.request(&client, Method::GET, "/hub/pending").send().await?;
    assert!(authed.status().is_success());
    Ok(())
}

#[tokio::test]
async fn pending_task_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = reqwest::Client::new();

    let hub = HubProcess::build().state_dir(dir.path()).spawn()?;
    hub.wait_healthy(TIMEOUT).await?;
    let resp: Value = hub
        .request(&client, Method::POST, "/hub/enqueue-task")
        .json(&json!({ "taskId": "restart-1", "taskType": "reindex", "payload": { "n": 1 } }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["taskId"], "restart-1");
    hub.stop()?;

    let hub = HubProcess::build().state_dir(dir.path()).spawn()?;
    hub.wait_healthy(TIMEOUT).await?;
    let pending: Value =
        hub.request(&client, Method::GET, "/hub/pending").send().await?.json().await?;
    assert_eq!(pending["tasks"][0]["taskId"], "restart-1");
    assert_eq!(pending["tasks"][0]["payload"]["n"], 1);
    Ok(())
}

#[tokio::test]
async fn lease_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = reqwest::Client::new();
    let claim = |worker: &str| {
        json!({ "candidates": ["job-1"], "workerId": worker, "leaseDurationSec": 300 })
    };

    let hub = HubProcess::build().state_dir(dir.path()).spawn()?;
    hub.wait_healthy(TIMEOUT).await?;
    let first: Value = hub
        .request(&client, Method::POST, "/lease/claim-next?partition=smoke")
        .json(&claim("w1"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(first["claimed"], true);
    hub.stop()?;

    let hub = HubProcess::build().state_dir(dir.path()).spawn()?;
    hub.wait_healthy(TIMEOUT).await?;
    let health: Value = reqwest::get(format!("{}/health", hub.base_url())).await?.json().await?;
    assert_eq!(health["leasePartitions"], 1);

    let second: Value = hub
        .request(&client, Method::POST, "/lease/claim-next?partition=smoke")
        .json(&claim("w2"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(second["claimed"], false);
    assert_eq!(second["checkedCount"], 1);
    Ok(())
}

#[tokio::test]
async fn queued_task_is_redelivered_to_new_agent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let client = reqwest::Client::new();
    let hub = HubProcess::build()
        .state_dir(dir.path())
        .service_key("svc")
        .arg("--hub-maintenance-secs", "1")
        .spawn()?;
    hub.wait_healthy(TIMEOUT).await?;

    let queued: Value = hub
        .request(&client, Method::POST, "/hub/broadcast-task")
        .json(&json!({ "taskId": "late-1", "taskType": "build", "payload": {} }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(queued["queued"], true);

    let mut req = hub.ws_url().into_client_request()?;
    req.headers_mut().insert("x-service-key", "svc".parse()?);
    let (mut ws, _) = tokio_tungstenite::connect_async(req).await?;
    let status = json!({ "type": "agent-status", "agentId": "builder", "status": "online" });
    ws.send(Message::Text(status.to_string().into())).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = tokio::time::timeout(remaining, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        let Message::Text(text) = frame else { continue };
        let msg: Value = serde_json::from_str(text.as_str())?;
        if msg["type"] == "task" {
            assert_eq!(msg["taskId"], "late-1");
            break;
        }
    }
    Ok(())
}
