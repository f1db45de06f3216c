//! Home page rewriting.
//!
//! The home page gets two edits, both applied as the document streams
//! through `lol_html`: the prefetch script is appended inside `<body>`, and
//! the `<a href="news">` site link gains a " (subway mode)" suffix. Every
//! other page is passed through untouched.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header;
use lol_html::html_content::ContentType;
use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use tokio::sync::mpsc;
use url::Url;

use crate::prefetch::script::SCRIPT_TAG;

/// Text appended to the site's own "news" link.
pub const LINK_LABEL: &str = " (subway mode)";

/// Chunks buffered between the network and the rewriter, per direction.
const CHANNEL_DEPTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("rewriting failed: {0}")]
    Rewriting(#[from] lol_html::errors::RewritingError),
    #[error("upstream body failed: {0}")]
    Upstream(String),
}

/// Build the home page rewriter writing into `output`.
fn home_page_rewriter<'h, O: OutputSink>(output: O) -> HtmlRewriter<'h, O> {
    HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("body", |el| {
                    el.append(SCRIPT_TAG, ContentType::Html);
                    Ok(())
                }),
                element!(r#"a[href="news"]"#, |el| {
                    el.append(LINK_LABEL, ContentType::Text);
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        output,
    )
}

/// Run the home page rewrite over `chunks`, handing output to `sink` as it is produced.
pub fn rewrite_chunks<'a, I, F>(chunks: I, mut sink: F) -> Result<(), RewriteError>
where
    I: IntoIterator<Item = &'a [u8]>,
    F: FnMut(&[u8]),
{
    let mut rewriter = home_page_rewriter(|c: &[u8]| sink(c));
    for chunk in chunks {
        rewriter.write(chunk)?;
    }
    rewriter.end()?;
    Ok(())
}

/// Rewrite a body stream without collecting it.
///
/// The rewriter is not `Send`, so it lives on a blocking thread fed through
/// two bounded channels; memory use is capped by the channel depth and the
/// rewriter's own small lookahead.
pub fn rewrite_stream<S, E>(input: S) -> impl Stream<Item = Result<Bytes, RewriteError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (in_tx, mut in_rx) = mpsc::channel::<Result<Bytes, RewriteError>>(CHANNEL_DEPTH);
    let (out_tx, out_rx) = mpsc::channel::<Result<Bytes, RewriteError>>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        let mut input = std::pin::pin!(input);
        while let Some(chunk) = input.next().await {
            let chunk = chunk.map_err(|e| RewriteError::Upstream(e.to_string()));
            let failed = chunk.is_err();
            if in_tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    tokio::task::spawn_blocking(move || {
        let sink_tx = out_tx.clone();
        let mut rewriter = home_page_rewriter(move |c: &[u8]| {
            if !c.is_empty() {
                let _ = sink_tx.blocking_send(Ok(Bytes::copy_from_slice(c)));
            }
        });

        while let Some(chunk) = in_rx.blocking_recv() {
            if out_tx.is_closed() {
                log::debug!("Home page reader went away, rewrite stopped");
                return;
            }
            let result = chunk.and_then(|bytes| rewriter.write(&bytes).map_err(RewriteError::from));
            if let Err(e) = result {
                log::warn!("Home page rewrite aborted: {}", e);
                let _ = out_tx.blocking_send(Err(e));
                return;
            }
        }
        if let Err(e) = rewriter.end() {
            let _ = out_tx.blocking_send(Err(e.into()));
        }
    });

    futures::stream::unfold(out_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

/// Applies the home page edits to responses for the home page.
#[derive(Debug, Clone)]
pub struct ContentTransformer {
    origin_host: String,
}

impl ContentTransformer {
    pub fn new(origin_host: impl Into<String>) -> Self {
        Self {
            origin_host: origin_host.into(),
        }
    }

    /// `https://<origin>`, `https://<origin>/` and `https://<origin>/news`, with no query.
    pub fn is_home_page(&self, url: &Url) -> bool {
        url.scheme() == "https"
            && url.host_str() == Some(self.origin_host.as_str())
            && url.port().is_none()
            && url.query().is_none()
            && matches!(url.path(), "" | "/" | "/news")
    }

    pub fn transform(&self, url: &Url, response: Response) -> Response {
        if !self.is_home_page(url) {
            return response;
        }
        log::debug!("Rewriting home page {}", url);

        let (mut parts, body) = response.into_parts();
        // The rewritten length is unknown until the stream ends.
        parts.headers.remove(header::CONTENT_LENGTH);
        let stream = rewrite_stream(body.into_data_stream());
        Response::from_parts(parts, Body::from_stream(stream))
    }
}
