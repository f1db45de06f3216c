pub mod parser;
pub mod rewrite;

/// One `<a>` element as a browser would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// The `href` attribute resolved against the document base, like `HTMLAnchorElement.href`.
    pub href: String,
    pub text: String,
}

/// The links of a parsed page, in document order.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: url::Url,
    pub title: String,
    pub anchors: Vec<Anchor>,
}

impl Page {
    /// Anchors whose resolved href equals `href`.
    pub fn anchors_to<'a>(&'a self, href: &'a str) -> impl Iterator<Item = (usize, &'a Anchor)> + 'a {
        self.anchors
            .iter()
            .enumerate()
            .filter(move |(_, a)| a.href == href)
    }
}
