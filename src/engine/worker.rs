//! Background refresh of stale or failed cache entries.
//!
//! Tasks are handled one at a time with a fixed pause in between, so the
//! origin never sees more than one refresh in flight from this process.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use crate::config::ProxyConfig;
use crate::net::cache::{now_millis, CacheMetadata, CachePolicy, CacheStore, StoreError};
use crate::net::fetch::{normalize_url, FetchError, Origin, OriginRequest};
use crate::net::queue::{RefreshReceiver, RefreshTask};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The origin answered, but with an error worth not caching over a good copy.
    #[error("origin answered {0}")]
    OriginStatus(StatusCode),
}

/// Outcome counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub stored: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.stored + self.failed
    }
}

pub struct RefreshWorker {
    origin_host: String,
    policy: CachePolicy,
    delay: Duration,
    batch_size: usize,
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
}

impl RefreshWorker {
    pub fn new(config: &ProxyConfig, store: Arc<dyn CacheStore>, origin: Arc<dyn Origin>) -> Self {
        Self {
            origin_host: config.origin_host.clone(),
            policy: CachePolicy::new(config.freshness),
            delay: config.refresh_delay,
            batch_size: config.batch_size,
            store,
            origin,
        }
    }

    /// Re-fetch one URL and overwrite its entry. An origin 5xx is never
    /// written over an existing entry; it fails the task instead.
    pub async fn refresh(&self, task: &RefreshTask) -> Result<(), RefreshError> {
        let url = normalize_url(&task.url, &self.origin_host)?;
        let key = url.to_string();

        let response = self.origin.fetch(OriginRequest::get(url)).await?;
        if response.status.is_server_error() {
            return Err(RefreshError::OriginStatus(response.status));
        }

        let metadata = CacheMetadata::capture(&response, &self.policy, now_millis());
        self.store.put(&key, response.body, metadata).await?;
        Ok(())
    }

    /// Refresh every task in order, pausing between consecutive tasks.
    pub async fn process_batch(&self, tasks: Vec<RefreshTask>) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, task) in tasks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            match self.refresh(task).await {
                Ok(()) => {
                    log::info!("Refreshed {}", task.url);
                    report.stored += 1;
                }
                Err(e) => {
                    log::warn!("Refresh failed for {}: {}", task.url, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drain `tasks` until every sender is dropped.
    pub async fn run(self, mut tasks: RefreshReceiver) {
        log::info!(
            "Refresh worker started (batch {}, pause {}ms)",
            self.batch_size,
            self.delay.as_millis()
        );
        let mut totals = BatchReport::default();
        while let Some(batch) = tasks.next_batch(self.batch_size).await {
            let report = self.process_batch(batch).await;
            log::debug!("Refresh batch: {} stored, {} failed", report.stored, report.failed);
            totals.stored += report.stored;
            totals.failed += report.failed;
            // Keep the pause between the last task of one batch and the first of the next.
            tokio::time::sleep(self.delay).await;
        }
        log::info!(
            "Refresh worker stopped after {} tasks ({} failed)",
            totals.total(),
            totals.failed
        );
    }
}
