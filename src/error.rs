use crate::config::ConfigError;
use crate::net::cache::StoreError;
use crate::net::fetch::FetchError;

/// Errors that can stop the proxy from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cache store: {0}")]
    Store(#[from] StoreError),
    #[error("origin client: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
