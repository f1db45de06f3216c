//! Refresh-task queue.
//!
//! Producers only see [`TaskQueue`]; the in-process implementation is a
//! bounded tokio channel whose receiving half feeds the refresh worker.
//! Delivery may repeat a URL any number of times, so consumers must treat
//! tasks as idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Request to re-fetch one URL from origin and overwrite its cache entry.
///
/// Wire form: `{"url": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshTask {
    pub url: String,
}

impl RefreshTask {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("refresh queue is full")]
    Full,
    #[error("refresh queue is closed")]
    Closed,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn send(&self, task: RefreshTask) -> Result<(), QueueError>;
}

/// Sending half of the in-process queue.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<RefreshTask>,
}

/// Receiving half, drained in batches by the refresh worker.
pub struct RefreshReceiver {
    rx: mpsc::Receiver<RefreshTask>,
}

/// Create a bounded queue holding up to `capacity` pending tasks.
pub fn channel(capacity: usize) -> (ChannelQueue, RefreshReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelQueue { tx }, RefreshReceiver { rx })
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    /// Never waits for room: a dropped refresh is re-requested by the next
    /// request that finds the entry stale.
    async fn send(&self, task: RefreshTask) -> Result<(), QueueError> {
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

impl RefreshReceiver {
    /// Wait for at least one task and take up to `limit` in arrival order.
    /// Returns `None` once every sender is gone and the queue is empty.
    pub async fn next_batch(&mut self, limit: usize) -> Option<Vec<RefreshTask>> {
        let mut batch = Vec::with_capacity(limit);
        let received = self.rx.recv_many(&mut batch, limit.max(1)).await;
        if received == 0 {
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_url_only() {
        let task = RefreshTask::new("https://news.ycombinator.com/news");
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, r#"{"url":"https://news.ycombinator.com/news"}"#);
        let back: RefreshTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[tokio::test]
    async fn batches_preserve_arrival_order() {
        let (queue, mut rx) = channel(8);
        for i in 0..5 {
            queue.send(RefreshTask::new(format!("https://a/{i}"))).await.unwrap();
        }

        let first = rx.next_batch(3).await.unwrap();
        assert_eq!(
            first.iter().map(|t| t.url.as_str()).collect::<Vec<_>>(),
            ["https://a/0", "https://a/1", "https://a/2"]
        );
        let second = rx.next_batch(3).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].url, "https://a/3");
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let (queue, _rx) = channel(1);
        queue.send(RefreshTask::new("https://a/1")).await.unwrap();
        assert_eq!(queue.send(RefreshTask::new("https://a/2")).await, Err(QueueError::Full));
    }

    #[tokio::test]
    async fn closes_when_senders_drop() {
        let (queue, mut rx) = channel(4);
        queue.send(RefreshTask::new("https://a/1")).await.unwrap();
        drop(queue);
        assert_eq!(rx.next_batch(10).await.unwrap().len(), 1);
        assert!(rx.next_batch(10).await.is_none());
    }

    #[tokio::test]
    async fn closed_receiver_reports_closed() {
        let (queue, rx) = channel(4);
        drop(rx);
        assert_eq!(queue.send(RefreshTask::new("https://a/1")).await, Err(QueueError::Closed));
    }
}
