// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the hub, lease, and rate-limit routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::hub::session::{AgentView, PendingTask, Session};
use crate::hub::{AlertOutcome, BroadcastOutcome};
use crate::lease::service::DEFAULT_PARTITION;
use crate::lease::{ClaimOutcome, Lease, LeaseListing};
use crate::ratelimit::{CheckOutcome, CheckRequest};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ErrorCode>;

/// Unwrap a JSON body, mapping any rejection to `BAD_REQUEST`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ErrorCode> {
    match payload {
        Ok(Json(v)) => Ok(v),
        Err(e) => {
            tracing::debug!(err = %e, "rejected request body");
            Err(ErrorCode::BadRequest)
        }
    }
}

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub agents: usize,
    pub pending_tasks: usize,
    pub lease_partitions: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTaskResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: BroadcastOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub success: bool,
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    #[serde(default)]
    pub severity: Option<String>,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: AlertOutcome,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse<T> {
    pub agents: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub tasks: Vec<PendingTask>,
}

#[derive(Debug, Deserialize)]
pub struct PartitionQuery {
    #[serde(default = "default_partition")]
    pub partition: String,
}

fn default_partition() -> String {
    DEFAULT_PARTITION.to_owned()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub candidates: Vec<String>,
    pub worker_id: String,
    pub lease_duration_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub task_id: String,
    #[serde(default)]
    pub worker_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    pub task_id: String,
    pub worker_id: String,
    pub extend_sec: u64,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    pub success: bool,
    pub lease: Lease,
}

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub success: bool,
    pub existed: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_owned(),
        agents: s.hub.agents().await.len(),
        pending_tasks: s.hub.pending().await.len(),
        lease_partitions: s.leases.partition_names().await.len(),
    })
}

/// `POST /hub/broadcast-task`
pub async fn broadcast_task(
    State(s): State<Arc<AppState>>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<BroadcastTaskResponse> {
    let req = body(payload)?;
    if req.task_type.is_empty() {
        return Err(ErrorCode::BadRequest);
    }
    let outcome = s.hub.broadcast_task(req.task_id, req.task_type, req.payload).await?;
    Ok(Json(BroadcastTaskResponse { success: true, outcome }))
}

/// `POST /hub/enqueue-task`
pub async fn enqueue_task(
    State(s): State<Arc<AppState>>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    let req = body(payload)?;
    if req.task_type.is_empty() {
        return Err(ErrorCode::BadRequest);
    }
    let task_id = s.hub.enqueue_task(req.task_id, req.task_type, req.payload).await?;
    Ok(Json(EnqueueResponse { success: true, task_id }))
}

/// `POST /hub/broadcast-alert`
pub async fn broadcast_alert(
    State(s): State<Arc<AppState>>,
    payload: Result<Json<AlertRequest>, JsonRejection>,
) -> ApiResult<AlertResponse> {
    let req = body(payload)?;
    if req.message.trim().is_empty() {
        return Err(ErrorCode::BadRequest);
    }
    let severity = req.severity.unwrap_or_else(|| "info".to_owned());
    let outcome = s.hub.broadcast_alert(severity, req.message, req.source).await?;
    Ok(Json(AlertResponse { success: true, outcome }))
}

/// `POST /hub/alerts/{id}/ack`
pub async fn acknowledge_alert(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SuccessResponse> {
    s.hub.acknowledge_alert(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `GET /hub/agents`
pub async fn list_agents(State(s): State<Arc<AppState>>) -> Json<AgentsResponse<AgentView>> {
    Json(AgentsResponse { agents: s.hub.agents().await })
}

/// `GET /hub/agents/known`
pub async fn known_agents(State(s): State<Arc<AppState>>) -> Json<AgentsResponse<Session>> {
    Json(AgentsResponse { agents: s.hub.known_agents().await })
}

/// `GET /hub/pending`
pub async fn pending_tasks(State(s): State<Arc<AppState>>) -> Json<PendingResponse> {
    Json(PendingResponse { tasks: s.hub.pending().await })
}

/// `POST /lease/claim-next`
pub async fn claim_next(
    State(s): State<Arc<AppState>>,
    Query(q): Query<PartitionQuery>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> ApiResult<ClaimOutcome> {
    let req = body(payload)?;
    let outcome = s
        .leases
        .claim_next(&q.partition, &req.candidates, &req.worker_id, req.lease_duration_sec)
        .await?;
    Ok(Json(outcome))
}

/// `POST /lease/release`
pub async fn release(
    State(s): State<Arc<AppState>>,
    Query(q): Query<PartitionQuery>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let req = body(payload)?;
    s.leases.release(&q.partition, &req.task_id, req.worker_id.as_deref()).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /lease/renew`
pub async fn renew(
    State(s): State<Arc<AppState>>,
    Query(q): Query<PartitionQuery>,
    payload: Result<Json<RenewRequest>, JsonRejection>,
) -> ApiResult<RenewResponse> {
    let req = body(payload)?;
    let lease = s.leases.renew(&q.partition, &req.task_id, &req.worker_id, req.extend_sec).await?;
    Ok(Json(RenewResponse { success: true, lease }))
}

/// `GET /lease/leases`
pub async fn list_leases(
    State(s): State<Arc<AppState>>,
    Query(q): Query<PartitionQuery>,
) -> ApiResult<LeaseListing> {
    Ok(Json(s.leases.list_leases(&q.partition).await?))
}

/// `DELETE /lease/task/{taskId}`
pub async fn delete_task(
    State(s): State<Arc<AppState>>,
    Query(q): Query<PartitionQuery>,
    Path(task_id): Path<String>,
) -> ApiResult<DeleteTaskResponse> {
    let existed = s.leases.delete_task(&q.partition, &task_id).await?;
    Ok(Json(DeleteTaskResponse { success: true, existed }))
}

/// `POST /ratelimit/check`
pub async fn rate_check(
    State(s): State<Arc<AppState>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> ApiResult<CheckOutcome> {
    let req = body(payload)?;
    Ok(Json(s.limiter.check(&req)?))
}
