// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-key state store.
//!
//! Partitions persist their exclusive state through a [`Store`]. Values are
//! JSON documents; keys are flat strings and [`Namespace`] carves a disjoint
//! key range out of a shared store so each partition only sees its own keys.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key/value store with prefix listing.
///
/// Implementations need not provide cross-writer atomicity: every key range
/// has exactly one writer (its owning partition).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// All entries whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>>;
}

pub type SharedStore = Arc<dyn Store>;

/// Read and decode a typed value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a typed value.
pub async fn put_json<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> anyhow::Result<()> {
    store.put(key, serde_json::to_value(value)?).await
}

/// Read every entry under `prefix`, decoding values into `T`.
///
/// Entries that fail to decode are skipped with a warning rather than failing
/// the whole listing.
pub async fn list_json<T: DeserializeOwned>(
    store: &dyn Store,
    prefix: &str,
) -> anyhow::Result<Vec<(String, T)>> {
    let entries = store.list(prefix).await?;
    let mut out = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match serde_json::from_value(value) {
            Ok(v) => out.push((key, v)),
            Err(e) => tracing::warn!(key = %key, err = %e, "skipping undecodable store entry"),
        }
    }
    Ok(out)
}

/// A prefixed view over another store.
pub struct Namespace {
    inner: SharedStore,
    prefix: String,
}

impl Namespace {
    pub fn new(inner: SharedStore, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    pub fn shared(inner: SharedStore, prefix: impl Into<String>) -> SharedStore {
        Arc::new(Self::new(inner, prefix))
    }

    fn full(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Store for Namespace {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.get(&self.full(key)).await
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.inner.put(&self.full(key), value).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.delete(&self.full(key)).await
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let entries = self.inner.list(&self.full(prefix)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(&self.prefix).map(|k| (k.to_owned(), v)))
            .collect())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
