//! Proxy configuration.
//!
//! Built once at startup from CLI flags (with environment fallbacks, see
//! `main.rs`) and then shared read-only by the orchestrator and the worker.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Host of the site being proxied when nothing else is configured.
pub const DEFAULT_ORIGIN_HOST: &str = "news.ycombinator.com";

/// Age after which a cached entry is served stale and refreshed.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// Pause between two consecutive refresh tasks.
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("origin host must not be empty")]
    EmptyOriginHost,
    #[error("origin host is not a valid host name: {0}")]
    InvalidOriginHost(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub origin_host: String,
    /// Directory for the on-disk store. `None` keeps entries in memory.
    pub store_dir: Option<PathBuf>,
    pub freshness: Duration,
    pub refresh_delay: Duration,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub origin_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
            origin_host: DEFAULT_ORIGIN_HOST.to_string(),
            store_dir: None,
            freshness: DEFAULT_FRESHNESS,
            refresh_delay: DEFAULT_REFRESH_DELAY,
            queue_capacity: 1024,
            batch_size: 10,
            origin_timeout: Duration::from_secs(15),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ProxyConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_origin_host(mut self, host: impl Into<String>) -> Self {
        self.origin_host = host.into();
        self
    }

    pub fn with_store_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.store_dir = dir;
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Reject values the proxy cannot run with.
    pub fn validate(self) -> Result<Self, ConfigError> {
        let host = self.origin_host.trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyOriginHost);
        }
        if url::Host::parse(host).is_err() || host.contains(['/', ':', '?', '#']) {
            return Err(ConfigError::InvalidOriginHost(host.to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero { field: "queue capacity" });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batch size" });
        }
        if self.freshness.is_zero() {
            return Err(ConfigError::Zero { field: "freshness window" });
        }
        Ok(Self {
            origin_host: host.to_ascii_lowercase(),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProxyConfig::default().validate().unwrap();
        assert_eq!(config.origin_host, "news.ycombinator.com");
        assert_eq!(config.freshness, Duration::from_secs(300));
        assert_eq!(config.refresh_delay, Duration::from_secs(1));
        assert!(config.store_dir.is_none());
    }

    #[test]
    fn origin_host_is_trimmed_and_lowercased() {
        let config = ProxyConfig::default()
            .with_origin_host("  News.Example.COM ")
            .validate()
            .unwrap();
        assert_eq!(config.origin_host, "news.example.com");
    }

    #[test]
    fn rejects_bad_origin_hosts() {
        let err = ProxyConfig::default().with_origin_host("").validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyOriginHost);

        let err = ProxyConfig::default()
            .with_origin_host("example.com:8080")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOriginHost(_)));
    }

    #[test]
    fn rejects_zero_sizes() {
        let err = ProxyConfig::default().with_batch_size(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "batch size" });

        let err = ProxyConfig::default().with_queue_capacity(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "queue capacity" });
    }
}
