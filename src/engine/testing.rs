//! In-memory stand-ins for the origin and the refresh queue.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, IF_NONE_MATCH};
use http::StatusCode;

use crate::net::fetch::{FetchError, Origin, OriginRequest, OriginResponse};
use crate::net::queue::{QueueError, RefreshTask, TaskQueue};

/// Origin answering from a fixed table; unknown URLs are unreachable.
///
/// Like the real site it answers `if-none-match` with an empty 304 and
/// greets a logged-in visitor (any `cookie`) by name in the page.
#[derive(Default)]
pub struct FakeOrigin {
    pages: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    calls: Mutex<Vec<String>>,
    headers: Mutex<Vec<HeaderMap>>,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, status: StatusCode, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, Bytes::from(body.to_string())));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Headers of every request received, in order.
    pub fn received_headers(&self) -> Vec<HeaderMap> {
        self.headers.lock().unwrap().clone()
    }
}

#[async_trait]
impl Origin for FakeOrigin {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(format!("{} {}", request.method, url));
        self.headers.lock().unwrap().push(request.headers.clone());
        let page = self.pages.lock().unwrap().get(&url).cloned();
        let Some((mut status, mut body)) = page else {
            return Err(FetchError::InvalidUrl(url::ParseError::EmptyHost));
        };
        if request.headers.contains_key(IF_NONE_MATCH) {
            status = StatusCode::NOT_MODIFIED;
            body = Bytes::new();
        } else if let Some(cookie) = request.headers.get(COOKIE) {
            let visitor = String::from_utf8_lossy(cookie.as_bytes());
            body = Bytes::from(format!(
                "{}<a href=\"logout?auth=SECRET\">{visitor}</a>",
                String::from_utf8_lossy(&body)
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        Ok(OriginResponse {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// Queue that records every task it accepts.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<RefreshTask>>,
}

impl RecordingQueue {
    pub fn urls(&self) -> Vec<String> {
        self.tasks.lock().unwrap().iter().map(|t| t.url.clone()).collect()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn send(&self, task: RefreshTask) -> Result<(), QueueError> {
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}
