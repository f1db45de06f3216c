//! Throttled link prefetching.
//!
//! The engine that actually runs is the inlined browser script in
//! [`script`]. This module is the same scheduler expressed over a virtual
//! clock, so the candidate rules and the one-hint-per-tick pacing can be
//! planned ahead of time (see `subway-mode plan`) and checked in tests.
//!
//! ```text
//! t=0s  hint #1
//! t=1s  inspect #1, hint #2
//! t=2s  inspect #2, hint #3
//! ...   queue empty -> timer cancelled, remaining inspections still fire
//! ```

pub mod script;

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use url::Url;

use crate::dom::Page;

/// Period of the recurring timer.
pub const TICK: Duration = Duration::from_secs(1);

/// Delay between issuing a hint and reading back its outcome.
pub const INSPECT_DELAY: Duration = Duration::from_secs(1);

/// Whether a resolved href should be prefetched from a page at `page_url`.
pub fn is_candidate(href: &str, page_url: &Url) -> bool {
    if !(href.starts_with("https://") || href.starts_with("http://")) {
        return false;
    }
    let Ok(target) = Url::parse(href) else {
        return false;
    };
    target.origin() != page_url.origin() || target.path().starts_with("/item")
}

/// Candidate hrefs in discovery order, without repeats.
pub fn select_candidates<'a, I>(hrefs: I, page_url: &Url) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    hrefs
        .into_iter()
        .map(str::trim)
        .filter(|href| is_candidate(href, page_url))
        .filter(|href| seen.insert(href.to_string()))
        .map(str::to_string)
        .collect()
}

/// The document-side effects the engine needs.
pub trait PrefetchHost {
    /// Attach a prefetch hint for `href` to the document head.
    fn add_hint(&mut self, href: &str);

    /// Status recorded for a fetched `href`, if any record exists.
    fn response_status(&self, href: &str) -> Option<u16>;

    /// Flag every anchor pointing at `href` as available.
    fn mark_available(&mut self, href: &str);
}

/// A hint issued by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub at: Duration,
    pub href: String,
}

pub struct PrefetchEngine {
    queue: VecDeque<String>,
    /// Outstanding outcome checks, ordered by due time.
    inspections: VecDeque<(Duration, String)>,
    next_tick: Option<Duration>,
    now: Duration,
    issued: Vec<Hint>,
    available: Vec<String>,
}

impl PrefetchEngine {
    /// An engine whose first tick fires immediately.
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            queue: candidates.into(),
            inspections: VecDeque::new(),
            next_tick: Some(Duration::ZERO),
            now: Duration::ZERO,
            issued: Vec::new(),
            available: Vec::new(),
        }
    }

    /// Scan `page` and queue its candidates.
    pub fn for_page(page: &Page) -> Self {
        Self::new(select_candidates(
            page.anchors.iter().map(|a| a.href.as_str()),
            &page.url,
        ))
    }

    /// Run every timer and inspection due at or before `until`.
    pub fn advance_to<H: PrefetchHost>(&mut self, host: &mut H, until: Duration) {
        loop {
            let tick_due = self.next_tick.filter(|t| *t <= until);
            let inspect_due = self.inspections.front().map(|(t, _)| *t).filter(|t| *t <= until);
            match (tick_due, inspect_due) {
                (None, None) => break,
                (Some(t), Some(i)) if i <= t => self.inspect_next(host),
                (Some(t), _) => self.fire_tick(host, t),
                (None, Some(_)) => self.inspect_next(host),
            }
        }
        self.now = self.now.max(until);
    }

    /// Advance until the timer is cancelled and every inspection has run.
    pub fn run_to_completion<H: PrefetchHost>(&mut self, host: &mut H) -> Duration {
        while !self.is_finished() {
            let next = match (self.next_tick, self.inspections.front()) {
                (Some(t), Some((i, _))) => t.min(*i),
                (Some(t), None) => t,
                (None, Some((i, _))) => *i,
                (None, None) => break,
            };
            self.advance_to(host, next);
        }
        self.now
    }

    fn fire_tick<H: PrefetchHost>(&mut self, host: &mut H, at: Duration) {
        self.now = at;
        let Some(href) = self.queue.pop_front() else {
            // Terminal: no more ticks.
            self.next_tick = None;
            return;
        };
        host.add_hint(&href);
        self.inspections.push_back((at + INSPECT_DELAY, href.clone()));
        self.issued.push(Hint { at, href });
        self.next_tick = Some(at + TICK);
    }

    fn inspect_next<H: PrefetchHost>(&mut self, host: &mut H) {
        let Some((at, href)) = self.inspections.pop_front() else {
            return;
        };
        self.now = at;
        let ok = match host.response_status(&href) {
            None | Some(0) => true,
            Some(status) => (200..300).contains(&status),
        };
        if ok {
            host.mark_available(&href);
            self.available.push(href);
        }
    }

    /// True while the recurring timer is still scheduled.
    pub fn timer_active(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.next_tick.is_none() && self.inspections.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn issued(&self) -> &[Hint] {
        &self.issued
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }
}

/// A parsed page standing in for the live document.
///
/// Tracks, per anchor, whether it has been marked available; statuses for
/// fetched hrefs can be preset to simulate the browser's resource timing.
pub struct PageHost<'p> {
    page: &'p Page,
    hints: Vec<String>,
    statuses: Vec<(String, u16)>,
    marked: Vec<bool>,
}

impl<'p> PageHost<'p> {
    pub fn new(page: &'p Page) -> Self {
        Self {
            page,
            hints: Vec::new(),
            statuses: Vec::new(),
            marked: vec![false; page.anchors.len()],
        }
    }

    pub fn with_status(mut self, href: impl Into<String>, status: u16) -> Self {
        self.statuses.push((href.into(), status));
        self
    }

    /// Hints in the order they were attached to the head.
    pub fn hints(&self) -> &[String] {
        &self.hints
    }

    /// Whether the anchor at `index` carries the available marker.
    pub fn is_marked(&self, index: usize) -> bool {
        self.marked.get(index).copied().unwrap_or(false)
    }
}

impl PrefetchHost for PageHost<'_> {
    fn add_hint(&mut self, href: &str) {
        self.hints.push(href.to_string());
    }

    fn response_status(&self, href: &str) -> Option<u16> {
        self.statuses
            .iter()
            .find(|(h, _)| h == href)
            .map(|(_, status)| *status)
    }

    fn mark_available(&mut self, href: &str) {
        for (index, _) in self.page.anchors_to(href) {
            self.marked[index] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parser::parse_page;

    fn hn_page(links: &[&str]) -> Page {
        let body: String = links
            .iter()
            .map(|href| format!(r#"<a href="{href}">link</a>"#))
            .collect();
        let html = format!("<html><body>{body}</body></html>");
        parse_page(&html, &Url::parse("https://news.ycombinator.com/").unwrap())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn candidate_rules() {
        let page = hn_page(&[
            "/news",
            "/item?id=1",
            "https://other.example/x",
            "https://news.ycombinator.com/news",
        ]);
        let engine = PrefetchEngine::for_page(&page);
        assert_eq!(engine.pending(), 2);
        assert_eq!(
            engine.queue.iter().collect::<Vec<_>>(),
            ["https://news.ycombinator.com/item?id=1", "https://other.example/x"]
        );
    }

    #[test]
    fn non_http_links_are_ignored() {
        let url = Url::parse("https://news.ycombinator.com/").unwrap();
        assert!(!is_candidate("javascript:void(0)", &url));
        assert!(!is_candidate("mailto:hn@ycombinator.com", &url));
        assert!(!is_candidate("ftp://files.example/x", &url));
        assert!(is_candidate("http://insecure.example/", &url));
        // Scheme-different same host is a different origin.
        assert!(is_candidate("http://news.ycombinator.com/newest", &url));
    }

    #[test]
    fn duplicates_keep_first_position() {
        let url = Url::parse("https://news.ycombinator.com/").unwrap();
        let got = select_candidates(
            ["https://b.example/", "https://a.example/", " https://b.example/ ", "https://a.example/"],
            &url,
        );
        assert_eq!(got, ["https://b.example/", "https://a.example/"]);
    }

    #[test]
    fn one_hint_per_tick_in_discovery_order() {
        let page = hn_page(&["https://a.example/", "https://b.example/", "https://c.example/"]);
        let mut host = PageHost::new(&page);
        let mut engine = PrefetchEngine::for_page(&page);

        engine.advance_to(&mut host, Duration::ZERO);
        assert_eq!(host.hints(), ["https://a.example/"]);

        engine.advance_to(&mut host, Duration::from_millis(999));
        assert_eq!(host.hints().len(), 1);

        engine.advance_to(&mut host, secs(1));
        assert_eq!(host.hints().len(), 2);

        engine.advance_to(&mut host, secs(10));
        let at: Vec<Duration> = engine.issued().iter().map(|h| h.at).collect();
        assert_eq!(at, [secs(0), secs(1), secs(2)]);
        assert_eq!(host.hints(), ["https://a.example/", "https://b.example/", "https://c.example/"]);
    }

    #[test]
    fn timer_stops_once_queue_drains() {
        let page = hn_page(&["https://a.example/", "https://b.example/"]);
        let mut host = PageHost::new(&page);
        let mut engine = PrefetchEngine::for_page(&page);

        engine.advance_to(&mut host, secs(1));
        assert!(engine.timer_active());
        // Tick at t=2 finds the queue empty and cancels the timer.
        engine.advance_to(&mut host, secs(2));
        assert!(!engine.timer_active());
        assert!(engine.is_finished());

        engine.advance_to(&mut host, secs(60));
        assert_eq!(host.hints().len(), 2);
    }

    #[test]
    fn empty_page_cancels_on_first_tick() {
        let page = hn_page(&["/news", "/newest"]);
        let mut host = PageHost::new(&page);
        let mut engine = PrefetchEngine::for_page(&page);
        assert_eq!(engine.run_to_completion(&mut host), Duration::ZERO);
        assert!(host.hints().is_empty());
    }

    #[test]
    fn marks_success_and_missing_records_but_not_errors() {
        let page = hn_page(&[
            "https://ok.example/",
            "https://gone.example/",
            "https://unknown.example/",
            "https://ok.example/",
        ]);
        let mut host = PageHost::new(&page)
            .with_status("https://ok.example/", 200)
            .with_status("https://gone.example/", 404);
        let mut engine = PrefetchEngine::for_page(&page);

        let finished_at = engine.run_to_completion(&mut host);
        assert_eq!(finished_at, secs(3));
        assert!(host.is_marked(0));
        assert!(!host.is_marked(1));
        assert!(host.is_marked(2));
        assert!(host.is_marked(3));
        assert_eq!(engine.available(), ["https://ok.example/", "https://unknown.example/"]);
    }

    #[test]
    fn inspection_waits_a_full_second() {
        let page = hn_page(&["https://a.example/"]);
        let mut host = PageHost::new(&page);
        let mut engine = PrefetchEngine::for_page(&page);

        engine.advance_to(&mut host, Duration::from_millis(500));
        assert!(!host.is_marked(0));
        engine.advance_to(&mut host, secs(1));
        assert!(host.is_marked(0));
    }
}
