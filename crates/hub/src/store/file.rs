// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory-backed store: one JSON file per key, written atomically.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::Store;

const SUFFIX: &str = ".json";

/// Suffix of files named by key digest. Never a valid base64 stem.
const DIGEST_SUFFIX: &str = ".key.json";

/// Longest encoded key used directly as a file name. Leaves room for the
/// suffix and the temp-file tail under the 255-byte name limit.
const MAX_STEM: usize = 200;

/// Contents of a digest-named file: the key cannot be read back from the
/// name, so it travels with the value.
#[derive(Serialize, Deserialize)]
struct KeyedEntry {
    key: String,
    value: Value,
}

/// Where a key lives on disk.
struct Slot {
    path: PathBuf,
    keyed: bool,
}

/// Store that keeps each key in its own file under `dir`.
///
/// File names are the URL-safe base64 of the key, so arbitrary key bytes
/// (slashes included) map to flat, portable names. Keys too long for that
/// are named by their SHA-256 instead and stored alongside their value.
pub struct FileStore {
    dir: PathBuf,
    seq: AtomicU32,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, seq: AtomicU32::new(0) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot(&self, key: &str) -> Slot {
        let stem = URL_SAFE_NO_PAD.encode(key);
        if stem.len() <= MAX_STEM {
            return Slot { path: self.dir.join(format!("{stem}{SUFFIX}")), keyed: false };
        }
        let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()));
        Slot { path: self.dir.join(format!("{digest}{DIGEST_SUFFIX}")), keyed: true }
    }

    fn key_for(file_name: &str) -> Option<String> {
        let stem = file_name.strip_suffix(SUFFIX)?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let slot = self.slot(key);
        let bytes = match tokio::fs::read(&slot.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !slot.keyed {
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
        let entry: KeyedEntry = serde_json::from_slice(&bytes)?;
        Ok((entry.key == key).then_some(entry.value))
    }

    /// Write tmp + rename. The temp name carries PID and a counter so
    /// concurrent writers never share a temp file.
    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let Slot { path, keyed } = self.slot(key);
        let json = if keyed {
            serde_json::to_vec(&KeyedEntry { key: key.to_owned(), value })?
        } else {
            serde_json::to_vec(&value)?
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        match tokio::fs::remove_file(self.slot(key).path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let keyed = name.ends_with(DIGEST_SUFFIX);
            let named = if keyed { None } else { Self::key_for(name) };
            if !keyed && !named.as_ref().is_some_and(|k| k.starts_with(prefix)) {
                continue;
            }
            // A concurrent delete between read_dir and read is not an error.
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match named {
                Some(key) => out.push((key, serde_json::from_slice(&bytes)?)),
                None => {
                    let entry: KeyedEntry = serde_json::from_slice(&bytes)?;
                    if entry.key.starts_with(prefix) {
                        out.push((entry.key, entry.value));
                    }
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
