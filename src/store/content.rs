//! Mirrored page bodies on the local filesystem.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use super::{sha256_hex, write_atomic};
use crate::diff::{DiffDocument, DiffError, apply_document};
use crate::error::CrawlError;

const KEPT_EXTENSIONS: [&str; 3] = [".html", ".xml", ".txt"];

/// Longest query kept verbatim in a file name; longer ones are hashed.
const MAX_QUERY_IN_NAME: usize = 64;

/// Identifies one mirrored page.
#[derive(Debug, Clone, Copy)]
pub struct PageRef<'a> {
    /// Document name.
    pub doc_name: &'a str,
    /// Document version.
    pub version: &'a str,
    /// Normalized page URL.
    pub url: &'a str,
    /// Response content type, used to pick the file extension.
    pub content_type: &'a str,
}

/// Storage for mirrored page bodies.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Reads the stored copy of a page, `None` if there is none.
    async fn read(&self, page: PageRef<'_>) -> Result<Option<String>, CrawlError>;

    /// Replaces the stored copy with `content`.
    async fn write_full(&self, page: PageRef<'_>, content: &str) -> Result<PathBuf, CrawlError>;

    /// Patches the stored copy with a chunked diff.
    ///
    /// Nothing is written unless the rebuilt content verifies against the
    /// diff's hashes.
    async fn apply_diff(
        &self,
        page: PageRef<'_>,
        diff: &DiffDocument,
    ) -> Result<PathBuf, CrawlError>;
}

/// [`ContentStore`] writing under `{root}/docs/{doc}/{version}/`.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Creates a store rooted at the output root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File a page is mirrored to.
    ///
    /// Directory paths map to `index.html`; names without an `.html`,
    /// `.xml` or `.txt` suffix gain `.html` for HTML content and `.txt`
    /// otherwise. A query string becomes part of the file name
    /// (`list/?page=2` maps to `list/index.page=2.html`) so pages that differ
    /// only by query never share a file. `.` and `..` segments are dropped so
    /// a URL can never escape the version directory.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Parsing`] if `page.url` is not a valid URL.
    pub fn page_path(&self, page: PageRef<'_>) -> Result<PathBuf, CrawlError> {
        let url = Url::parse(page.url)
            .map_err(|e| CrawlError::parsing(page.url, e.to_string()))?;

        let mut path = self
            .root
            .join("docs")
            .join(page.doc_name)
            .join(page.version);

        let decoded = urlencoding::decode(url.path())
            .map_or_else(|_| url.path().to_string(), |p| p.into_owned());
        let relative = Path::new(decoded.trim_start_matches('/'));
        let mut file_name = None;
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                if let Some(previous) = file_name.replace(segment.to_os_string()) {
                    path.push(previous);
                }
            }
        }

        let file_name = match file_name {
            Some(name) if !decoded.ends_with('/') => {
                let mut name = name.to_string_lossy().into_owned();
                if !KEPT_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                    name.push_str(if is_html(page.content_type) { ".html" } else { ".txt" });
                }
                name
            }
            Some(name) => {
                path.push(name);
                "index.html".to_string()
            }
            None => "index.html".to_string(),
        };
        let file_name = match query_tag(&url) {
            Some(tag) => match file_name.rsplit_once('.') {
                Some((stem, ext)) => format!("{stem}.{tag}.{ext}"),
                None => format!("{file_name}.{tag}"),
            },
            None => file_name,
        };
        path.push(file_name);
        Ok(path)
    }
}

/// File-name fragment for a URL's query, `None` without one.
///
/// Short queries made only of `[A-Za-z0-9=&_-]` are kept as they are; any
/// other query is replaced by `q` and the first 16 hex digits of its
/// SHA-256.
fn query_tag(url: &Url) -> Option<String> {
    let query = url.query().filter(|q| !q.is_empty())?;
    let readable = query.len() <= MAX_QUERY_IN_NAME
        && query
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'&' | b'_' | b'-'));
    if readable {
        Some(query.to_string())
    } else {
        Some(format!("q{}", &sha256_hex(query.as_bytes())[..16]))
    }
}

fn is_html(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/html") || lower.starts_with("application/xhtml+xml")
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn read(&self, page: PageRef<'_>) -> Result<Option<String>, CrawlError> {
        let path = self.page_path(page)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CrawlError::database("read page", e)),
        }
    }

    #[instrument(skip(self, content), fields(url = %page.url))]
    async fn write_full(&self, page: PageRef<'_>, content: &str) -> Result<PathBuf, CrawlError> {
        let path = self.page_path(page)?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!(path = %path.display(), bytes = content.len(), "wrote full page");
        Ok(path)
    }

    #[instrument(skip(self, diff), fields(url = %page.url, chunks = diff.chunks.len()))]
    async fn apply_diff(
        &self,
        page: PageRef<'_>,
        diff: &DiffDocument,
    ) -> Result<PathBuf, CrawlError> {
        let path = self.page_path(page)?;
        let old = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CrawlError::database("read page for diff", e))?;
        let rebuilt = apply_document(&old, diff).map_err(|e| match e {
            DiffError::BaseHashMismatch { expected, actual }
            | DiffError::ResultHashMismatch { expected, actual } => {
                CrawlError::content_changed(page.url, expected, actual)
            }
            other @ DiffError::BaseMismatch { .. } => CrawlError::from(other),
        })?;
        write_atomic(&path, rebuilt.as_bytes()).await?;
        info!(path = %path.display(), "partial update applied");
        Ok(path)
    }
}
