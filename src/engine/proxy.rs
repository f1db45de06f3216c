use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use url::Url;

use crate::config::ProxyConfig;
use crate::dom::rewrite::ContentTransformer;
use crate::engine::stats::ProxyStats;
use crate::net::cache::{lookup, now_millis, CacheMetadata, CachePolicy, CacheStore, Snapshot};
use crate::net::fetch::{
    cache_fill_headers, is_personalized, normalize_uri, relayable_headers, Origin, OriginRequest,
    OriginResponse,
};
use crate::net::queue::{RefreshTask, TaskQueue};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Fresh,
    Stale,
    Origin,
}

/// The per-request pipeline: Store → (Origin) → (Refresh) → Rewrite
pub struct ProxyOrchestrator {
    origin_host: String,
    policy: CachePolicy,
    max_body_bytes: usize,
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    queue: Arc<dyn TaskQueue>,
    transformer: ContentTransformer,
    pub stats: ProxyStats,
}

impl ProxyOrchestrator {
    pub fn new(
        config: &ProxyConfig,
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn Origin>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            origin_host: config.origin_host.clone(),
            policy: CachePolicy::new(config.freshness),
            max_body_bytes: config.max_body_bytes,
            store,
            origin,
            queue,
            transformer: ContentTransformer::new(config.origin_host.clone()),
            stats: ProxyStats::new(),
        }
    }

    /// Answer one inbound request. Never fails: every problem becomes a status code.
    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let url = match normalize_uri(&parts.uri, &self.origin_host) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Rejecting request for {}: {}", parts.uri, e);
                return plain_response(StatusCode::BAD_REQUEST, "bad request target");
            }
        };

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Rejecting request body for {}: {}", url, e);
                return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
            }
        };

        let request = OriginRequest {
            method: parts.method,
            url,
            headers: parts.headers,
            body,
        };
        let url = request.url.clone();

        // Only anonymous GETs share the cache.
        let cacheable = request.method == Method::GET && !is_personalized(&request.headers);
        let (response, source) = if cacheable {
            self.serve_cacheable(request).await
        } else {
            log::debug!("Cache BYPASS: {} {}", request.method, url);
            self.stats.record_bypass();
            let origin = self.fetch_origin(request).await;
            (origin_response(origin), Source::Origin)
        };

        let stale = source == Source::Stale;
        let failed = response.status().is_server_error();
        if stale || failed {
            self.schedule_refresh(&url).await;
        }

        self.transformer.transform(&url, response)
    }

    async fn serve_cacheable(&self, mut request: OriginRequest) -> (Response, Source) {
        let key = request.url.to_string();

        if let Some(snapshot) = lookup(self.store.as_ref(), &key).await {
            let age = snapshot.age(now_millis());
            let source = if self.policy.is_fresh(age) {
                log::debug!("Cache HIT: {} ({}s old)", key, age.as_secs());
                self.stats.record_hit();
                Source::Fresh
            } else {
                log::debug!("Cache STALE: {} ({}s old)", key, age.as_secs());
                self.stats.record_stale();
                Source::Stale
            };
            return (self.snapshot_response(snapshot), source);
        }

        log::debug!("Cache MISS: {}", key);
        self.stats.record_miss();
        request.headers = cache_fill_headers(&request.headers);
        let fetched = self.fetch_origin(request).await;
        self.store_in_background(key, &fetched);
        (origin_response(fetched), Source::Origin)
    }

    async fn fetch_origin(&self, request: OriginRequest) -> OriginFetchOutcome {
        let url = request.url.clone();
        match self.origin.fetch(request).await {
            Ok(response) => OriginFetchOutcome::Fetched(response),
            Err(e) => {
                log::warn!("Origin fetch failed for {}: {}", url, e);
                self.stats.record_origin_failure();
                OriginFetchOutcome::Unreachable(OriginResponse::bad_gateway(&e))
            }
        }
    }

    /// Write a fetched page to the store without holding up the response.
    fn store_in_background(&self, key: String, outcome: &OriginFetchOutcome) {
        // A stand-in 502 says nothing about the origin's content.
        let OriginFetchOutcome::Fetched(response) = outcome else {
            return;
        };
        if !is_full_retrieval(response.status) {
            log::debug!("Not storing {} answer for {}", response.status, key);
            return;
        }
        let metadata = CacheMetadata::capture(response, &self.policy, now_millis());
        let body = response.body.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.put(&key, body, metadata).await {
                Ok(()) => log::debug!("Stored {}", key),
                Err(e) => log::warn!("Cache write failed for {}: {}", key, e),
            }
        });
    }

    async fn schedule_refresh(&self, url: &Url) {
        let task = RefreshTask::new(url.as_str());
        match self.queue.send(task).await {
            Ok(()) => {
                log::debug!("Refresh scheduled for {}", url);
                self.stats.record_refresh(true);
            }
            Err(e) => {
                log::warn!("Refresh for {} not scheduled: {}", url, e);
                self.stats.record_refresh(false);
            }
        }
    }

    fn snapshot_response(&self, snapshot: Snapshot) -> Response {
        let mut headers = snapshot.headers;
        if let Ok(directive) = HeaderValue::from_str(&self.policy.served_directive()) {
            headers.insert(header::CACHE_CONTROL, directive);
        }
        build_response(snapshot.status, headers, snapshot.body)
    }
}

enum OriginFetchOutcome {
    Fetched(OriginResponse),
    Unreachable(OriginResponse),
}

/// Partial and not-modified answers only make sense to the client that asked.
fn is_full_retrieval(status: StatusCode) -> bool {
    status != StatusCode::NOT_MODIFIED && status != StatusCode::PARTIAL_CONTENT
}

fn origin_response(outcome: OriginFetchOutcome) -> Response {
    let (OriginFetchOutcome::Fetched(response) | OriginFetchOutcome::Unreachable(response)) = outcome;
    build_response(response.status, relayable_headers(&response.headers), response.body)
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn plain_response(status: StatusCode, message: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    build_response(status, headers, Bytes::from_static(message.as_bytes()))
}
