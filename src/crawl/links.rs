//! Link, pagination and `rel=canonical` extraction from page bodies.
//!
//! Parsing is synchronous and returns owned strings; the parsed document
//! never lives across an `.await`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

#[allow(clippy::expect_used)]
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static 'a[href]' selector is valid"));

#[allow(clippy::expect_used)]
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"link[rel="canonical"][href]"#).expect("static canonical selector is valid")
});

#[allow(clippy::expect_used)]
static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("page number regex is valid"));

#[allow(clippy::expect_used)]
static PAGINATION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(next|previous|prev|first|last|load more|show more|próximo|anterior|primeira|última|ver mais|carregar mais)\b",
    )
    .expect("pagination label regex is valid")
});

/// Links found on one page, absolute and with fragments preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    /// Every distinct http(s) link.
    pub links: BTreeSet<String>,
    /// The subset whose anchor text marks them as pagination.
    pub pagination: BTreeSet<String>,
}

impl PageLinks {
    /// Whether `url` was classified as a pagination link.
    #[must_use]
    pub fn is_pagination(&self, url: &str) -> bool {
        self.pagination.contains(url)
    }
}

/// Whether anchor text labels a pagination control: a bare page number or
/// a next/previous/first/last/load-more style label.
#[must_use]
pub fn is_pagination_text(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && (PAGE_NUMBER.is_match(text) || PAGINATION_LABEL.is_match(text))
}

fn anchor_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href.trim()).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

/// Extracts `a[href]` links from `html`, resolved against `base`.
///
/// Non-http(s) targets (`mailto:`, `javascript:`, ...) are dropped.
#[must_use]
pub fn extract_links(html: &str, base: &Url) -> PageLinks {
    let document = Html::parse_document(html);
    let mut out = PageLinks::default();
    for element in document.select(&ANCHORS) {
        let Some(url) = element.value().attr("href").and_then(|href| resolve(base, href)) else {
            continue;
        };
        if is_pagination_text(&anchor_text(element)) {
            out.pagination.insert(url.clone());
        }
        out.links.insert(url);
    }
    out
}

/// The page's `<link rel="canonical">` target, resolved against `base`.
#[must_use]
pub fn canonical_link(html: &str, base: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&CANONICAL)
        .find_map(|element| element.value().attr("href").and_then(|href| resolve(base, href)))
}
