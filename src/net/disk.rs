//! Directory-backed [`CacheStore`].
//!
//! Each key maps to one file named after an FNV-1a hash of the key. The file
//! holds a single line of JSON (the key plus its [`CacheMetadata`]) followed
//! by the raw body bytes. Writes land in a temp file that is renamed into
//! place, so readers see either the old entry or the new one.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::cache::{CacheEntry, CacheMetadata, CacheStore, StoreError};

#[derive(Serialize, Deserialize)]
struct Envelope {
    key: String,
    metadata: CacheMetadata,
}

pub struct DirStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl DirStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        log::info!("Cache directory: {}", root.display());
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{:016x}.entry", key_hash(key)))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{:016x}.{}.{n}.tmp", key_hash(key), std::process::id()))
    }
}

/// FNV-1a over the key bytes.
fn key_hash(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325; // FNV offset basis
    for b in key.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3); // FNV prime
    }
    hash
}

#[async_trait]
impl CacheStore for DirStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let raw = match tokio::fs::read(self.entry_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let split = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| StoreError::Malformed("missing metadata line".into()))?;
        let envelope: Envelope = serde_json::from_slice(&raw[..split])?;

        if envelope.key != key {
            log::debug!("Hash collision: {} is stored under the slot for {}", envelope.key, key);
            return Ok(None);
        }

        let body = Bytes::from(raw).slice(split + 1..);
        Ok(Some(CacheEntry {
            body,
            metadata: envelope.metadata,
        }))
    }

    async fn put(&self, key: &str, body: Bytes, metadata: CacheMetadata) -> Result<(), StoreError> {
        let envelope = Envelope {
            key: key.to_string(),
            metadata,
        };
        let mut file = serde_json::to_vec(&envelope)?;
        file.push(b'\n');
        file.extend_from_slice(&body);

        let tmp = self.tmp_path(key);
        tokio::fs::write(&tmp, &file).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.entry_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
