//! Page snapshot storage.
//!
//! A [`CacheStore`] is a plain key-value contract: body bytes plus a small
//! JSON-serializable [`CacheMetadata`] record, keyed by canonical origin URL.
//! Freshness is never stored; it is judged at read time from the capture
//! timestamp by [`CachePolicy`].

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::fetch::{storable_headers, OriginResponse};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("malformed entry: {0}")]
    Malformed(String),
}

/// Per-entry metadata, stored alongside the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// Epoch milliseconds at which the entry was written.
    pub capture_timestamp: i64,
    pub status: u16,
    pub status_text: String,
    /// JSON object of header name to value, fixed at capture time.
    pub headers: String,
}

impl CacheMetadata {
    /// Snapshot an origin response, with `cache-control` rewritten to `policy`.
    pub fn capture(response: &OriginResponse, policy: &CachePolicy, now_ms: i64) -> Self {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &storable_headers(&response.headers) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            map.entry(name.as_str().to_string())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        map.insert(
            header::CACHE_CONTROL.as_str().to_string(),
            policy.stored_directive(),
        );

        Self {
            capture_timestamp: now_ms,
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            // A map of strings always serializes.
            headers: serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    pub fn age(&self, now_ms: i64) -> Duration {
        age_since(self.capture_timestamp, now_ms)
    }

    pub fn status_code(&self) -> Result<StatusCode, StoreError> {
        StatusCode::from_u16(self.status)
            .map_err(|_| StoreError::Malformed(format!("status {}", self.status)))
    }

    pub fn header_map(&self) -> Result<HeaderMap, StoreError> {
        let map: BTreeMap<String, String> = serde_json::from_str(&self.headers)?;
        let mut headers = HeaderMap::with_capacity(map.len());
        for (name, value) in map {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| StoreError::Malformed(format!("header name {name:?}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| StoreError::Malformed(format!("header value for {name}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Time since `captured_at`; an entry from the future counts as brand new.
fn age_since(captured_at: i64, now_ms: i64) -> Duration {
    let millis = now_ms.saturating_sub(captured_at).max(0);
    Duration::from_millis(millis as u64)
}

/// One stored page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub body: Bytes,
    pub metadata: CacheMetadata,
}

/// A cache entry decoded into servable parts.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub captured_at: i64,
}

impl Snapshot {
    pub fn age(&self, now_ms: i64) -> Duration {
        age_since(self.captured_at, now_ms)
    }
}

impl CacheEntry {
    pub fn decode(self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            status: self.metadata.status_code()?,
            headers: self.metadata.header_map()?,
            body: self.body,
            captured_at: self.metadata.capture_timestamp,
        })
    }
}

/// The freshness window and the `cache-control` directives derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub freshness: Duration,
}

/// How long an origin error may be papered over with a cached copy.
const STALE_IF_ERROR_SECS: u64 = 24 * 60 * 60;

impl CachePolicy {
    pub fn new(freshness: Duration) -> Self {
        Self { freshness }
    }

    /// Directive written into snapshots at capture time.
    pub fn stored_directive(&self) -> String {
        format!(
            "public, max-age={}, stale-while-revalidate",
            self.freshness.as_secs()
        )
    }

    /// Directive sent with responses served from the cache.
    pub fn served_directive(&self) -> String {
        format!(
            "{}, stale-if-error={STALE_IF_ERROR_SECS}",
            self.stored_directive()
        )
    }

    pub fn is_fresh(&self, age: Duration) -> bool {
        age < self.freshness
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FRESHNESS)
    }
}

/// Key-value storage for page snapshots.
///
/// Implementations must be safe to share across request handlers; a `put`
/// fully replaces whatever was stored under the key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    async fn put(&self, key: &str, body: Bytes, metadata: CacheMetadata) -> Result<(), StoreError>;
}

/// Read and decode `key`, treating every failure as a miss.
pub async fn lookup(store: &dyn CacheStore, key: &str) -> Option<Snapshot> {
    let entry = match store.get(key).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("Cache read failed for {}: {}", key, e);
            return None;
        }
    };
    match entry.decode() {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::warn!("Ignoring malformed cache entry for {}: {}", key, e);
            None
        }
    }
}

/// In-process store. Entries live until the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pages.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, body: Bytes, metadata: CacheMetadata) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), CacheEntry { body, metadata });
        Ok(())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
