use crate::dom::{Anchor, Page};
use scraper::{Html, Selector};
use url::Url;

/// Parse raw HTML and collect its anchors, resolving each href the way the
/// browser does (against `<base href>` when present, else the page URL).
pub fn parse_page(html: &str, url: &Url) -> Page {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();

    let base = Selector::parse("base[href]")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| url.join(href.trim()).ok())
        .unwrap_or_else(|| url.clone());

    let mut anchors = Vec::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for el in document.select(&sel) {
            let Some(raw) = el.value().attr("href") else {
                continue;
            };
            // Unresolvable hrefs read as "" in the browser and never qualify.
            let Ok(resolved) = base.join(raw.trim()) else {
                continue;
            };
            anchors.push(Anchor {
                href: resolved.to_string(),
                text: el.text().collect::<String>().trim().to_string(),
            });
        }
    }

    Page {
        url: url.clone(),
        title: title.trim().to_string(),
        anchors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hn() -> Url {
        Url::parse("https://news.ycombinator.com/news").unwrap()
    }

    #[test]
    fn parse_title_and_anchors_in_order() {
        let html = r#"
        <html>
            <head><title> Hacker News </title></head>
            <body>
                <a href="news">Hacker News</a>
                <a href="item?id=1">12 comments</a>
                <a href="https://other.example/x">Story</a>
                <a name="no-href">anchor</a>
            </body>
        </html>
        "#;

        let page = parse_page(html, &hn());
        assert_eq!(page.title, "Hacker News");
        let hrefs: Vec<&str> = page.anchors.iter().map(|a| a.href.as_str()).collect();
        assert_eq!(
            hrefs,
            [
                "https://news.ycombinator.com/news",
                "https://news.ycombinator.com/item?id=1",
                "https://other.example/x",
            ]
        );
        assert_eq!(page.anchors[1].text, "12 comments");
    }

    #[test]
    fn honours_base_href() {
        let html = r#"<html><head><base href="https://mirror.example/hn/"></head>
            <body><a href="item?id=5">x</a></body></html>"#;
        let page = parse_page(html, &hn());
        assert_eq!(page.anchors[0].href, "https://mirror.example/hn/item?id=5");
    }

    #[test]
    fn anchors_to_finds_every_duplicate() {
        let html = r#"<body><a href="/item?id=1">a</a><a href="/x">b</a>
            <a href="https://news.ycombinator.com/item?id=1">c</a></body>"#;
        let page = parse_page(html, &hn());
        let hits: Vec<usize> = page
            .anchors_to("https://news.ycombinator.com/item?id=1")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, [0, 2]);
    }
}
