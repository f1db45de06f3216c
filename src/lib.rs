//! subway-mode: a caching reverse proxy for Hacker News that keeps serving
//! from its own store while the origin is slow or down, and teaches the home
//! page to prefetch the links it points at.

pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod net;
pub mod prefetch;
pub mod server;

pub use config::ProxyConfig;
pub use error::ProxyError;
