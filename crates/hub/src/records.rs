// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit records written by the hub and read back for status snapshots.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delegation::Delegation;
use crate::hub::protocol::{ProviderHealth, RepoStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub task_type: String,
    pub payload: Value,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRecord {
    #[serde(flatten)]
    pub repo: RepoStatus,
    pub reported_by: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub alert_id: String,
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    #[serde(flatten)]
    pub health: ProviderHealth,
    pub updated_at: u64,
}

/// Completion report from an agent.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: String,
    pub result: Value,
    pub logs: Option<Vec<String>>,
    pub at: u64,
}

/// Relational store for tasks, repos, alerts, and provider health.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn record_task(&self, task: TaskRecord) -> anyhow::Result<()>;

    /// Attach a result to a task. Unknown task ids get a stub record.
    async fn record_task_result(&self, task_id: &str, outcome: TaskOutcome) -> anyhow::Result<()>;

    async fn upsert_repos(&self, agent_id: &str, repos: &[RepoStatus], at: u64)
        -> anyhow::Result<()>;

    async fn record_alert(&self, alert: AlertRecord) -> anyhow::Result<()>;

    /// Mark an alert acknowledged. Returns whether it exists.
    async fn acknowledge_alert(&self, alert_id: &str, at: u64) -> anyhow::Result<bool>;

    async fn record_provider_health(
        &self,
        providers: &[ProviderHealth],
        at: u64,
    ) -> anyhow::Result<()>;

    /// Most recent tasks first.
    async fn recent_tasks(&self, limit: usize) -> anyhow::Result<Vec<TaskRecord>>;

    async fn repos(&self, limit: usize) -> anyhow::Result<Vec<RepoRecord>>;

    /// Newest unacknowledged alerts first.
    async fn unacknowledged_alerts(&self, limit: usize) -> anyhow::Result<Vec<AlertRecord>>;

    async fn provider_health(&self, limit: usize) -> anyhow::Result<Vec<ProviderRecord>>;
}

#[derive(Default)]
struct Tables {
    tasks: VecDeque<TaskRecord>,
    repos: BTreeMap<String, RepoRecord>,
    alerts: VecDeque<AlertRecord>,
    providers: BTreeMap<String, ProviderRecord>,
}

/// In-memory record tables. Task and alert history keep at most `capacity`
/// rows each, oldest evicted first.
pub struct MemoryRecords {
    tables: Mutex<Tables>,
    capacity: usize,
}

impl MemoryRecords {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self { tables: Mutex::new(Tables::default()), capacity: capacity.max(1) }
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tables.lock().tasks.iter().find(|t| t.task_id == task_id).cloned()
    }
}

impl Default for MemoryRecords {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn push_bounded<T>(rows: &mut VecDeque<T>, row: T, capacity: usize) {
    rows.push_back(row);
    while rows.len() > capacity {
        rows.pop_front();
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn record_task(&self, task: TaskRecord) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        tables.tasks.retain(|t| t.task_id != task.task_id);
        push_bounded(&mut tables.tasks, task, self.capacity);
        Ok(())
    }

    async fn record_task_result(&self, task_id: &str, outcome: TaskOutcome) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        if let Some(task) = tables.tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.status = outcome.status;
            task.result = Some(outcome.result);
            task.logs = outcome.logs;
            task.completed_at = Some(outcome.at);
            return Ok(());
        }

        let stub = TaskRecord {
            task_id: task_id.to_owned(),
            task_type: "unknown".to_owned(),
            payload: Value::Null,
            created_at: outcome.at,
            created_by: None,
            delegation: None,
            status: outcome.status,
            result: Some(outcome.result),
            logs: outcome.logs,
            completed_at: Some(outcome.at),
        };
        push_bounded(&mut tables.tasks, stub, self.capacity);
        Ok(())
    }

    async fn upsert_repos(
        &self,
        agent_id: &str,
        repos: &[RepoStatus],
        at: u64,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        for repo in repos {
            let record =
                RepoRecord { repo: repo.clone(), reported_by: agent_id.to_owned(), updated_at: at };
            tables.repos.insert(repo.name.clone(), record);
        }
        Ok(())
    }

    async fn record_alert(&self, alert: AlertRecord) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        push_bounded(&mut tables.alerts, alert, self.capacity);
        Ok(())
    }

    async fn acknowledge_alert(&self, alert_id: &str, at: u64) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock();
        match tables.alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            Some(alert) => {
                alert.acknowledged_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_provider_health(
        &self,
        providers: &[ProviderHealth],
        at: u64,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock();
        for health in providers {
            let record = ProviderRecord { health: health.clone(), updated_at: at };
            tables.providers.insert(health.provider.clone(), record);
        }
        Ok(())
    }

    async fn recent_tasks(&self, limit: usize) -> anyhow::Result<Vec<TaskRecord>> {
        Ok(self.tables.lock().tasks.iter().rev().take(limit).cloned().collect())
    }

    async fn repos(&self, limit: usize) -> anyhow::Result<Vec<RepoRecord>> {
        Ok(self.tables.lock().repos.values().take(limit).cloned().collect())
    }

    async fn unacknowledged_alerts(&self, limit: usize) -> anyhow::Result<Vec<AlertRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .alerts
            .iter()
            .rev()
            .filter(|a| a.acknowledged_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn provider_health(&self, limit: usize) -> anyhow::Result<Vec<ProviderRecord>> {
        Ok(self.tables.lock().providers.values().take(limit).cloned().collect())
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
