//! Pure URL normalization.
//!
//! [`normalize`] never touches the network. Shortener expansion lives in
//! [`super::UrlCanonicalizer`], which calls this after resolving redirects.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::CrawlError;

/// Query keys treated as session identifiers and stripped during
/// normalization. Matched case-insensitively against the whole key.
#[allow(clippy::expect_used)]
static SESSION_PARAM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(session|sid)$",
        r"(?i)sessionid",
        r"(?i)^(s|sess)$",
        r"(?i)phpsessid",
        r"(?i)jsessionid",
        r"(?i)aspsessionid",
        r"(?i)cfid",
        r"(?i)cftoken",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("session pattern is valid"))
    .collect()
});

/// Path characters left untouched when re-encoding, besides ASCII
/// alphanumerics and `-._~`.
const PATH_SAFE: &[u8] = b"/:@&=+$,";

/// A URL in canonical form.
///
/// Two URLs that refer to the same resource produce equal `NormalizedUrl`s,
/// and normalizing a `NormalizedUrl` again yields the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    /// The canonical string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Parses the canonical string back into a [`Url`].
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Parsing`] if the stored string is not a URL,
    /// which only happens for values deserialized from a corrupted snapshot.
    pub fn to_url(&self) -> Result<Url, CrawlError> {
        Url::parse(&self.0).map_err(|e| CrawlError::parsing(&self.0, e.to_string()))
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalizes `raw` into its canonical form.
///
/// Steps, in order:
/// 1. protocol-relative `//host/...` becomes `http://host/...`
/// 2. parse: scheme and host are lowercased, the host IDNA-encoded, default
///    ports dropped and `.`/`..` segments resolved
/// 3. the fragment is removed
/// 4. `www1.` / `www2.` hosts collapse to `www.`
/// 5. the path is percent-decoded and re-encoded with the safe set `/:@&=+$,`
/// 6. repeated slashes collapse
/// 7. a path ending in a file extension loses its trailing slash, any other
///    path gains one
/// 8. session-id and empty query parameters are dropped and the rest sorted
///
/// # Errors
///
/// Returns [`CrawlError::Parsing`] for relative, hostless or otherwise
/// unparsable input (including hosts that fail IDNA encoding).
pub fn normalize(raw: &str) -> Result<NormalizedUrl, CrawlError> {
    let trimmed = raw.trim();
    let absolute = if trimmed.starts_with("//") {
        format!("http:{trimmed}")
    } else {
        trimmed.to_string()
    };

    let mut url = Url::parse(&absolute).map_err(|e| {
        if matches!(e, url::ParseError::IdnaError) {
            warn!(url = %raw, "failed to IDNA-encode host");
        }
        CrawlError::parsing(raw, e.to_string())
    })?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(CrawlError::parsing(raw, "URL has no host"));
    }

    url.set_fragment(None);
    collapse_numbered_www(&mut url, raw)?;

    let path = canonical_path(url.path());
    url.set_path(&path);

    normalize_query(&mut url);

    debug!(from = %raw, to = %url, "normalized URL");
    Ok(NormalizedUrl(url.into()))
}

/// Whether `key` names a session identifier.
#[must_use]
pub fn is_session_param(key: &str) -> bool {
    SESSION_PARAM_PATTERNS.iter().any(|re| re.is_match(key))
}

/// `host[:port]` of a URL, the unit `is_valid_link` compares domains by.
#[must_use]
pub fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

fn collapse_numbered_www(url: &mut Url, raw: &str) -> Result<(), CrawlError> {
    let Some(host) = url.host_str() else {
        return Ok(());
    };
    let Some(rest) = host
        .strip_prefix("www1.")
        .or_else(|| host.strip_prefix("www2."))
    else {
        return Ok(());
    };
    let collapsed = format!("www.{rest}");
    url.set_host(Some(&collapsed))
        .map_err(|e| CrawlError::parsing(raw, e.to_string()))
}

fn canonical_path(path: &str) -> String {
    let encoded = encode_path(path);
    let mut collapsed = String::with_capacity(encoded.len() + 1);
    for ch in encoded.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }

    let trimmed = collapsed.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if has_file_extension(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Extension test on the last path segment: a dot that is not part of a
/// leading run of dots.
fn has_file_extension(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let stem = segment.trim_start_matches('.');
    stem.contains('.')
}

fn encode_path(path: &str) -> String {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    let mut out = String::with_capacity(decoded.len());
    for &byte in decoded.iter() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) || PATH_SAFE.contains(&byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn normalize_query(url: &mut Url) {
    if url.query().is_none() {
        return;
    }
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, value)| !value.is_empty() && !is_session_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }
}
