use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use subway_mode::config::{ProxyConfig, DEFAULT_ORIGIN_HOST};
use subway_mode::dom::parser::parse_page;
use subway_mode::prefetch::{PageHost, PrefetchEngine};
use subway_mode::{server, ProxyError};

/// Caching reverse proxy for Hacker News.
#[derive(Parser)]
#[command(name = "subway-mode", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Print the prefetch schedule the home page script would follow for a saved page
    Plan {
        /// Saved HTML file
        file: PathBuf,
        /// URL the page was served from, used to resolve relative links
        #[arg(long, default_value = "https://news.ycombinator.com/")]
        page_url: Url,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to accept connections on
    #[arg(long, env = "SUBWAY_LISTEN", default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Host of the proxied site
    #[arg(long = "origin", env = "SUBWAY_ORIGIN", default_value = DEFAULT_ORIGIN_HOST)]
    origin_host: String,

    /// Keep the cache in this directory instead of in memory
    #[arg(long, env = "SUBWAY_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Seconds an entry is served without a refresh
    #[arg(long, env = "SUBWAY_FRESH_SECS", default_value_t = 300)]
    fresh_secs: u64,

    /// Pause between background refreshes
    #[arg(long, env = "SUBWAY_REFRESH_DELAY_MS", default_value_t = 1000)]
    refresh_delay_ms: u64,

    /// Pending refreshes held before new ones are dropped
    #[arg(long, env = "SUBWAY_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    /// Refreshes taken from the queue at a time
    #[arg(long, env = "SUBWAY_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    #[arg(long, env = "SUBWAY_ORIGIN_TIMEOUT_SECS", default_value_t = 15)]
    origin_timeout_secs: u64,

    /// Largest request body forwarded to the origin
    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_bytes: usize,
}

impl ServeArgs {
    fn into_config(self) -> ProxyConfig {
        ProxyConfig::default()
            .with_listen(self.listen)
            .with_origin_host(self.origin_host)
            .with_store_dir(self.store_dir)
            .with_freshness(Duration::from_secs(self.fresh_secs))
            .with_refresh_delay(Duration::from_millis(self.refresh_delay_ms))
            .with_queue_capacity(self.queue_capacity)
            .with_batch_size(self.batch_size)
            .with_origin_timeout(Duration::from_secs(self.origin_timeout_secs))
            .with_max_body_bytes(self.max_body_bytes)
    }
}

fn plan(file: PathBuf, page_url: Url) -> Result<(), ProxyError> {
    let html = std::fs::read_to_string(&file)?;
    let page = parse_page(&html, &page_url);
    let mut host = PageHost::new(&page);
    let mut engine = PrefetchEngine::for_page(&page);
    let done = engine.run_to_completion(&mut host);

    for hint in engine.issued() {
        let label = page
            .anchors_to(&hint.href)
            .next()
            .map(|(_, anchor)| anchor.text.as_str())
            .unwrap_or_default();
        println!("t+{}s {} {:?}", hint.at.as_secs(), hint.href, label);
    }
    log::info!(
        "{:?}: {} of {} anchors prefetched, timer stops at t+{}s",
        page.title,
        engine.issued().len(),
        page.anchors.len(),
        done.as_secs()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Plan { file, page_url }) => plan(file, page_url),
        None => {
            let config = cli.serve.into_config().validate()?;
            server::serve(config).await
        }
    }
}
