//! Sitemap discovery.
//!
//! Seeds the frontier from `sitemap.xml` next to the seed URL. Both
//! `<urlset>` documents and `<sitemapindex>` documents are understood;
//! indexes are followed up to [`MAX_SITEMAP_DEPTH`] levels. Discovery is
//! best-effort: fetch and parse failures are logged and yield no URLs.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use crate::error::CrawlError;

/// Maximum nesting of sitemap indexes that will be followed.
pub const MAX_SITEMAP_DEPTH: usize = 3;

/// What a sitemap document lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<urlset>`: page URLs.
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: further sitemap URLs.
    Index(Vec<String>),
}

/// Parses a sitemap document.
///
/// # Errors
///
/// Returns [`CrawlError::Parsing`] for malformed XML or a document that is
/// neither a urlset nor a sitemap index.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, CrawlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_index = None;
    let mut in_loc = false;
    let mut locs = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"urlset" => is_index = Some(false),
                    b"sitemapindex" => is_index = Some(true),
                    b"loc" => in_loc = true,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Text(t)) if in_loc => {
                let text = t
                    .unescape()
                    .map_err(|e| CrawlError::parsing("sitemap", e.to_string()))?;
                let loc = text.trim();
                if !loc.is_empty() {
                    locs.push(loc.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CrawlError::parsing("sitemap", e.to_string())),
            _ => {}
        }
    }

    match is_index {
        Some(true) => Ok(SitemapDocument::Index(locs)),
        Some(false) => Ok(SitemapDocument::UrlSet(locs)),
        None => Err(CrawlError::parsing(
            "sitemap",
            "document is neither a urlset nor a sitemapindex",
        )),
    }
}

/// Fetches `sitemap.xml` relative to `seed` and returns every page URL it
/// lists, following sitemap indexes.
#[instrument(skip(client), fields(seed = %seed))]
pub async fn discover_sitemap_urls(client: &HttpClient, seed: &str) -> Vec<String> {
    let root = match Url::parse(seed).and_then(|base| base.join("sitemap.xml")) {
        Ok(url) => url.to_string(),
        Err(e) => {
            warn!(error = %e, "cannot derive sitemap URL");
            return Vec::new();
        }
    };

    let mut pages = Vec::new();
    let mut pending = vec![(root, 0usize)];
    while let Some((sitemap_url, depth)) = pending.pop() {
        let body = match client.get_page(&sitemap_url).await {
            Ok(page) => page.body,
            Err(e) => {
                warn!(sitemap = %sitemap_url, error = %e, "sitemap fetch failed");
                continue;
            }
        };
        match parse_sitemap(&body) {
            Ok(SitemapDocument::UrlSet(urls)) => pages.extend(urls),
            Ok(SitemapDocument::Index(children)) => {
                if depth + 1 >= MAX_SITEMAP_DEPTH {
                    warn!(sitemap = %sitemap_url, "sitemap index nesting too deep, ignoring children");
                    continue;
                }
                pending.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
            }
            Err(e) => warn!(sitemap = %sitemap_url, error = %e, "sitemap parse failed"),
        }
    }

    info!(count = pages.len(), "discovered sitemap URLs");
    pages
}
