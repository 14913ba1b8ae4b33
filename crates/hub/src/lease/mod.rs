// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease coordinator: exclusive, time-bounded ownership of task ids.
//!
//! A [`LeaseCoordinator`] owns one partition's lease records. Callers hold it
//! behind the partition lock (see [`service::LeaseService`]), so every method
//! takes `&mut self` and runs without interleaving.

pub mod service;

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::{storage_unavailable, ErrorCode};
use crate::store::{get_json, list_json, put_json, SharedStore};

/// Key prefix for lease records inside a partition.
pub const LEASE_PREFIX: &str = "lease/";

pub const ALL_LEASED: &str = "All tasks are leased";

/// Exclusive ownership record over one task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub task_id: String,
    pub worker_id: String,
    pub claimed_at: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<u64>,
}

impl Lease {
    /// A lease whose expiry is at or before `now` counts as absent.
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms
    }
}

/// Result of [`LeaseCoordinator::claim_next`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub claimed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_count: Option<usize>,
}

/// Result of [`LeaseCoordinator::list_leases`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseListing {
    pub leases: Vec<Lease>,
    pub cleaned_up_count: usize,
}

/// Outcome of [`LeaseCoordinator::sweep_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub remaining: usize,
}

/// Argument check shared by [`LeaseCoordinator::claim_next`] and callers that
/// must reject a claim before opening a partition for it.
pub fn claim_args_valid(candidates: &[String], worker_id: &str, lease_duration_sec: u64) -> bool {
    !candidates.is_empty() && !worker_id.is_empty() && lease_duration_sec > 0
}

fn lease_key(task_id: &str) -> String {
    format!("{LEASE_PREFIX}{task_id}")
}

/// Single-writer lease state for one partition.
pub struct LeaseCoordinator {
    store: SharedStore,
    clock: SharedClock,
}

impl LeaseCoordinator {
    /// `store` must already be scoped to this partition.
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    async fn read(&self, task_id: &str) -> Result<Option<Lease>, ErrorCode> {
        get_json(&*self.store, &lease_key(task_id))
            .await
            .map_err(|e| storage_unavailable("lease.read", e))
    }

    async fn write(&self, lease: &Lease) -> Result<(), ErrorCode> {
        put_json(&*self.store, &lease_key(&lease.task_id), lease)
            .await
            .map_err(|e| storage_unavailable("lease.write", e))
    }

    async fn remove(&self, task_id: &str) -> Result<bool, ErrorCode> {
        self.store
            .delete(&lease_key(task_id))
            .await
            .map_err(|e| storage_unavailable("lease.delete", e))
    }

    /// Claim the first candidate without a valid lease.
    ///
    /// Candidates are tried in the order given; the first free one wins.
    pub async fn claim_next(
        &mut self,
        candidates: &[String],
        worker_id: &str,
        lease_duration_sec: u64,
    ) -> Result<ClaimOutcome, ErrorCode> {
        if !claim_args_valid(candidates, worker_id, lease_duration_sec) {
            return Err(ErrorCode::BadRequest);
        }

        for task_id in candidates {
            let now = self.clock.now_ms();
            if let Some(existing) = self.read(task_id).await? {
                if existing.is_valid_at(now) {
                    continue;
                }
            }

            let lease = Lease {
                task_id: task_id.clone(),
                worker_id: worker_id.to_owned(),
                claimed_at: now,
                expires_at: now.saturating_add(lease_duration_sec.saturating_mul(1000)),
                renewed_at: None,
            };
            self.write(&lease).await?;
            tracing::debug!(task_id = %task_id, worker_id, "lease claimed");
            return Ok(ClaimOutcome {
                claimed: true,
                task_id: Some(task_id.clone()),
                lease: Some(lease),
                reason: None,
                checked_count: None,
            });
        }

        Ok(ClaimOutcome {
            claimed: false,
            task_id: None,
            lease: None,
            reason: Some(ALL_LEASED.to_owned()),
            checked_count: Some(candidates.len()),
        })
    }

    /// Release a lease. Missing or expired leases release trivially.
    pub async fn release(
        &mut self,
        task_id: &str,
        worker_id: Option<&str>,
    ) -> Result<(), ErrorCode> {
        if task_id.is_empty() {
            return Err(ErrorCode::BadRequest);
        }
        let Some(existing) = self.read(task_id).await? else {
            return Ok(());
        };
        let held = existing.is_valid_at(self.clock.now_ms());
        if let Some(worker_id) = worker_id {
            if held && existing.worker_id != worker_id {
                return Err(ErrorCode::NotLeaseHolder);
            }
        }
        self.remove(task_id).await?;
        tracing::debug!(task_id, "lease released");
        Ok(())
    }

    /// Extend a held lease to `now + extend_sec`. Expired leases cannot be
    /// revived; the worker must claim again.
    pub async fn renew(
        &mut self,
        task_id: &str,
        worker_id: &str,
        extend_sec: u64,
    ) -> Result<Lease, ErrorCode> {
        if task_id.is_empty() || worker_id.is_empty() || extend_sec == 0 {
            return Err(ErrorCode::BadRequest);
        }
        let now = self.clock.now_ms();
        let Some(mut lease) = self.read(task_id).await?.filter(|l| l.is_valid_at(now)) else {
            return Err(ErrorCode::NoActiveLease);
        };
        if lease.worker_id != worker_id {
            return Err(ErrorCode::NotLeaseHolder);
        }
        lease.expires_at = now.saturating_add(extend_sec.saturating_mul(1000));
        lease.renewed_at = Some(now);
        self.write(&lease).await?;
        Ok(lease)
    }

    /// List valid leases, deleting expired ones found along the way.
    pub async fn list_leases(&mut self) -> Result<LeaseListing, ErrorCode> {
        let entries = list_json::<Lease>(&*self.store, LEASE_PREFIX)
            .await
            .map_err(|e| storage_unavailable("lease.list", e))?;
        let now = self.clock.now_ms();
        let mut leases = Vec::with_capacity(entries.len());
        let mut cleaned_up_count = 0;
        for (_, lease) in entries {
            if lease.is_valid_at(now) {
                leases.push(lease);
            } else {
                self.remove(&lease.task_id).await?;
                cleaned_up_count += 1;
            }
        }
        Ok(LeaseListing { leases, cleaned_up_count })
    }

    /// Drop a task's lease regardless of holder or expiry.
    pub async fn delete_task(&mut self, task_id: &str) -> Result<bool, ErrorCode> {
        if task_id.is_empty() {
            return Err(ErrorCode::BadRequest);
        }
        self.remove(task_id).await
    }

    /// Delete every expired lease and count what is left.
    pub async fn sweep_expired(&mut self) -> Result<SweepReport, ErrorCode> {
        let listing = self.list_leases().await?;
        if listing.cleaned_up_count > 0 {
            tracing::info!(removed = listing.cleaned_up_count, "swept expired leases");
        }
        Ok(SweepReport { removed: listing.cleaned_up_count, remaining: listing.leases.len() })
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
