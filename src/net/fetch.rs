//! Origin retrieval.
//!
//! Every URL that reaches the origin goes through [`pin_to_origin`] first, so
//! the proxy can only ever talk to the one configured host over https.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, StatusCode, Uri};
use url::Url;

use crate::config::ProxyConfig;

/// Headers that describe a single connection and must not be forwarded or stored.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("client error: {0}")]
    Client(reqwest::Error),
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("failed to read body: {0}")]
    Body(reqwest::Error),
}

/// A request about to be sent to the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OriginRequest {
    /// Plain GET with no inbound headers, as used for background refreshes.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A fully read origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OriginResponse {
    /// Stand-in response when the origin could not be reached at all.
    pub fn bad_gateway(err: &FetchError) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status: StatusCode::BAD_GATEWAY,
            status_text: "Bad Gateway".to_string(),
            headers,
            body: Bytes::from(format!("origin unreachable: {err}")),
        }
    }
}

/// Something that can answer origin requests.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, FetchError>;
}

/// Rebuild `path`/`query` as an https URL on `host`, with no port, user info or fragment.
pub fn pin_to_origin(path: &str, query: Option<&str>, host: &str) -> Result<Url, FetchError> {
    let mut url = Url::parse(&format!("https://{host}"))?;
    url.set_path(path);
    url.set_query(query);
    Ok(url)
}

/// Canonical origin URL for an inbound request target.
pub fn normalize_uri(uri: &Uri, host: &str) -> Result<Url, FetchError> {
    pin_to_origin(uri.path(), uri.query(), host)
}

/// Canonical origin URL for an absolute URL string (refresh tasks carry these).
pub fn normalize_url(raw: &str, host: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(raw)?;
    pin_to_origin(parsed.path(), parsed.query(), host)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Inbound headers that may be passed on to the origin.
///
/// `host` is dropped so the client sets the origin's own, and
/// `accept-encoding` so the body comes back decodable for rewriting.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::HOST || name == header::ACCEPT_ENCODING {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Request headers that turn a retrieval into a partial or conditional one.
const CONDITIONAL: &[&str] = &[
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "if-unmodified-since",
    "range",
];

/// Whether the origin's answer to these headers is specific to one visitor.
pub fn is_personalized(headers: &HeaderMap) -> bool {
    headers.contains_key(header::COOKIE) || headers.contains_key(header::AUTHORIZATION)
}

/// Inbound headers that may be sent on a fetch whose result is shared
/// through the cache: the forwardable ones minus conditionals and ranges,
/// so the origin always answers with the full page.
pub fn cache_fill_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = forwardable_headers(headers);
    for name in CONDITIONAL {
        out.remove(*name);
    }
    out
}

/// Origin headers that may be relayed to the client.
///
/// `content-length` is left to the server, since the body may have been
/// decoded or rewritten on the way through.
pub fn relayable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Origin headers worth keeping in a cache snapshot.
///
/// `set-cookie` is per-visitor and never shared through the cache.
pub fn storable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = relayable_headers(headers);
    out.remove(header::SET_COOKIE);
    out
}

/// The real origin, reached over the network with `reqwest`.
pub struct OriginFetcher {
    client: reqwest::Client,
}

impl OriginFetcher {
    pub fn new(config: &ProxyConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "Mozilla/5.0 (compatible; subway-mode/",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(config.origin_timeout)
            // Redirects go back to the client untouched.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Origin for OriginFetcher {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, FetchError> {
        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .headers(forwardable_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(FetchError::Request)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(FetchError::Body)?;

        log::debug!("Origin {} -> {}", request.url, status);

        Ok(OriginResponse {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
