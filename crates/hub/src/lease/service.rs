// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partition registry for lease coordinators.
//!
//! Each named partition owns one [`LeaseCoordinator`] behind a FIFO async
//! mutex: operations on the same partition run one at a time, in arrival
//! order, while different partitions proceed concurrently. Every partition
//! also owns a sweep alarm.
//!
//! Only a claim opens a partition. Lookups against a name that is not open
//! are answered from the store without registering anything, and a sweep
//! that leaves a partition without leases closes it again, so the registry
//! and its alarms stay proportional to live leases.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

use crate::alarm::{disarm, spawn_alarm, ALARM_KEY};
use crate::clock::SharedClock;
use crate::error::ErrorCode;
use crate::lease::{
    claim_args_valid, ClaimOutcome, Lease, LeaseCoordinator, LeaseListing, LEASE_PREFIX,
};
use crate::store::{Namespace, SharedStore, Store};

pub const DEFAULT_PARTITION: &str = "default";

/// Root-store prefix under which each partition gets `leases/<name>/`.
const ROOT_PREFIX: &str = "leases/";

const MAX_PARTITION_NAME: usize = 64;

/// Partition names are path-safe identifiers: `[A-Za-z0-9_.-]{1,64}`.
pub fn valid_partition_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_PARTITION_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

type PartitionMap = HashMap<String, Arc<LeasePartition>>;

/// One lease partition.
struct LeasePartition {
    name: String,
    coordinator: Arc<Mutex<LeaseCoordinator>>,
    /// Set under the coordinator lock once the partition left the registry.
    retired: AtomicBool,
    alarm: CancellationToken,
}

impl LeasePartition {
    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Coordinator access for an operation that never opens a partition.
enum Access<'a> {
    Open(OwnedMutexGuard<LeaseCoordinator>),
    /// Not open: the registry read lock keeps a claim from opening it while
    /// the store is consulted directly.
    Closed(RwLockReadGuard<'a, PartitionMap>, LeaseCoordinator),
}

impl Access<'_> {
    fn coordinator(&mut self) -> &mut LeaseCoordinator {
        match self {
            Access::Open(guard) => &mut **guard,
            Access::Closed(_, coordinator) => coordinator,
        }
    }
}

/// Registry mapping partition name to its coordinator.
pub struct LeaseService {
    store: SharedStore,
    clock: SharedClock,
    sweep_interval: Duration,
    shutdown: CancellationToken,
    partitions: Arc<RwLock<PartitionMap>>,
}

impl LeaseService {
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            clock,
            sweep_interval,
            shutdown,
            partitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn scoped(&self, name: &str) -> SharedStore {
        Namespace::shared(Arc::clone(&self.store), format!("{ROOT_PREFIX}{name}/"))
    }

    /// Get or open the named partition.
    async fn partition(&self, name: &str) -> Result<Arc<LeasePartition>, ErrorCode> {
        if !valid_partition_name(name) {
            return Err(ErrorCode::BadRequest);
        }

        {
            let partitions = self.partitions.read().await;
            if let Some(p) = partitions.get(name) {
                return Ok(Arc::clone(p));
            }
        }

        let mut partitions = self.partitions.write().await;
        // Double-check after acquiring write lock.
        if let Some(p) = partitions.get(name) {
            return Ok(Arc::clone(p));
        }

        let scoped = self.scoped(name);
        let partition = Arc::new(LeasePartition {
            name: name.to_owned(),
            coordinator: Arc::new(Mutex::new(LeaseCoordinator::new(
                Arc::clone(&scoped),
                Arc::clone(&self.clock),
            ))),
            retired: AtomicBool::new(false),
            alarm: self.shutdown.child_token(),
        });

        let swept = Arc::clone(&partition);
        let registry = Arc::clone(&self.partitions);
        let alarm_store = Arc::clone(&scoped);
        spawn_alarm(
            format!("lease-sweep:{name}"),
            scoped,
            Arc::clone(&self.clock),
            self.sweep_interval,
            partition.alarm.clone(),
            move || {
                let partition = Arc::clone(&swept);
                let registry = Arc::clone(&registry);
                let store = Arc::clone(&alarm_store);
                async move { sweep_partition(&partition, &registry, &*store).await }
            },
        );

        partitions.insert(name.to_owned(), Arc::clone(&partition));
        tracing::info!(partition = %name, "lease partition opened");
        Ok(partition)
    }

    /// Lock the named partition's coordinator, opening the partition if needed.
    async fn open(&self, name: &str) -> Result<OwnedMutexGuard<LeaseCoordinator>, ErrorCode> {
        loop {
            let partition = self.partition(name).await?;
            let guard = Arc::clone(&partition.coordinator).lock_owned().await;
            if !partition.is_retired() {
                return Ok(guard);
            }
        }
    }

    /// Lock the named partition if it is open, or fall back to a coordinator
    /// over its (normally empty) key range without registering it.
    async fn access(&self, name: &str) -> Result<Access<'_>, ErrorCode> {
        if !valid_partition_name(name) {
            return Err(ErrorCode::BadRequest);
        }
        loop {
            let partitions = self.partitions.read().await;
            let Some(partition) = partitions.get(name).cloned() else {
                let coordinator = LeaseCoordinator::new(self.scoped(name), Arc::clone(&self.clock));
                return Ok(Access::Closed(partitions, coordinator));
            };
            drop(partitions);
            let guard = Arc::clone(&partition.coordinator).lock_owned().await;
            if !partition.is_retired() {
                return Ok(Access::Open(guard));
            }
        }
    }

    pub async fn claim_next(
        &self,
        partition: &str,
        candidates: &[String],
        worker_id: &str,
        lease_duration_sec: u64,
    ) -> Result<ClaimOutcome, ErrorCode> {
        if !claim_args_valid(candidates, worker_id, lease_duration_sec) {
            return Err(ErrorCode::BadRequest);
        }
        self.open(partition).await?.claim_next(candidates, worker_id, lease_duration_sec).await
    }

    pub async fn release(
        &self,
        partition: &str,
        task_id: &str,
        worker_id: Option<&str>,
    ) -> Result<(), ErrorCode> {
        self.access(partition).await?.coordinator().release(task_id, worker_id).await
    }

    pub async fn renew(
        &self,
        partition: &str,
        task_id: &str,
        worker_id: &str,
        extend_sec: u64,
    ) -> Result<Lease, ErrorCode> {
        self.access(partition).await?.coordinator().renew(task_id, worker_id, extend_sec).await
    }

    pub async fn list_leases(&self, partition: &str) -> Result<LeaseListing, ErrorCode> {
        self.access(partition).await?.coordinator().list_leases().await
    }

    pub async fn delete_task(&self, partition: &str, task_id: &str) -> Result<bool, ErrorCode> {
        self.access(partition).await?.coordinator().delete_task(task_id).await
    }

    /// Re-open every partition that still holds lease records so its sweep
    /// resumes. Alarm records left behind by partitions without leases are
    /// deleted.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let mut with_leases = BTreeSet::new();
        let mut orphaned = BTreeSet::new();
        for (key, _) in self.store.list(ROOT_PREFIX).await? {
            let Some((name, rest)) = key.strip_prefix(ROOT_PREFIX).and_then(|r| r.split_once('/'))
            else {
                continue;
            };
            if !valid_partition_name(name) {
                continue;
            }
            if rest.starts_with(LEASE_PREFIX) {
                with_leases.insert(name.to_owned());
            } else if rest == ALARM_KEY {
                orphaned.insert(name.to_owned());
            }
        }

        for name in orphaned.difference(&with_leases) {
            disarm(&*self.scoped(name)).await?;
            tracing::debug!(partition = %name, "dropped alarm of empty partition");
        }
        for name in &with_leases {
            self.partition(name).await.map_err(|code| anyhow::anyhow!("open {name}: {code}"))?;
        }
        Ok(with_leases.len())
    }

    /// Names of all open partitions, sorted.
    pub async fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// One alarm pass: expire leases, and close the partition once it is empty.
async fn sweep_partition(
    partition: &LeasePartition,
    registry: &RwLock<PartitionMap>,
    store: &dyn Store,
) {
    let mut coordinator = partition.coordinator.lock().await;
    let report = match coordinator.sweep_expired().await {
        Ok(report) => report,
        Err(code) => {
            tracing::warn!(partition = %partition.name, %code, "lease sweep failed");
            return;
        }
    };
    if report.remaining > 0 {
        return;
    }

    partition.retired.store(true, Ordering::Release);
    partition.alarm.cancel();
    if let Err(e) = disarm(store).await {
        tracing::warn!(partition = %partition.name, err = %e, "failed to drop alarm");
    }
    // Removed before the coordinator unlocks, so waiters that find the
    // partition retired open a fresh one on retry.
    registry.write().await.remove(&partition.name);
    drop(coordinator);
    tracing::info!(partition = %partition.name, "lease partition closed");
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
