//! HTTP front end: one catch-all route in front of the orchestrator, plus
//! the refresh worker running beside it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;

use crate::config::ProxyConfig;
use crate::engine::proxy::ProxyOrchestrator;
use crate::engine::worker::RefreshWorker;
use crate::error::ProxyError;
use crate::net::cache::{CacheStore, MemoryStore};
use crate::net::disk::DirStore;
use crate::net::fetch::{Origin, OriginFetcher};
use crate::net::queue;

/// How long shutdown waits for queued refreshes before giving up on them.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(proxy: Arc<ProxyOrchestrator>) -> Router {
    Router::new().fallback(proxy_request).with_state(proxy)
}

async fn proxy_request(State(proxy): State<Arc<ProxyOrchestrator>>, request: Request) -> Response {
    proxy.handle(request).await
}

async fn open_store(config: &ProxyConfig) -> Result<Arc<dyn CacheStore>, ProxyError> {
    let store: Arc<dyn CacheStore> = match &config.store_dir {
        Some(dir) => Arc::new(DirStore::open(dir).await?),
        None => {
            log::info!("Using in-memory cache");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

/// Run the proxy until Ctrl-C, then let the refresh worker finish.
pub async fn serve(config: ProxyConfig) -> Result<(), ProxyError> {
    let store = open_store(&config).await?;
    let origin: Arc<dyn Origin> = Arc::new(OriginFetcher::new(&config)?);
    let (tasks, receiver) = queue::channel(config.queue_capacity);

    let worker = RefreshWorker::new(&config, Arc::clone(&store), Arc::clone(&origin));
    let worker = tokio::spawn(worker.run(receiver));

    let proxy = Arc::new(ProxyOrchestrator::new(&config, store, origin, Arc::new(tasks)));
    let stats = proxy.stats.clone();

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    log::info!(
        "Proxying http://{} -> https://{}",
        listener.local_addr()?,
        config.origin_host
    );

    axum::serve(listener, router(proxy))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down: {}", stats.summary());

    // The router held the last queue sender; once it is gone the worker
    // finishes what is queued and returns.
    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => log::info!("Refresh worker drained"),
        Ok(Err(e)) => log::warn!("Refresh worker panicked: {}", e),
        Err(_) => log::warn!(
            "Refresh worker still busy after {}s, abandoning queued refreshes",
            WORKER_DRAIN_TIMEOUT.as_secs()
        ),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
