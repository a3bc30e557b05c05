//! URL canonicalization.
//!
//! Two layers:
//! - [`normalize`] is a pure function turning any absolute URL string into a
//!   [`NormalizedUrl`]; it is idempotent, so canonical strings can be used
//!   directly as visited-set and hash-store keys.
//! - [`UrlCanonicalizer`] adds the network-dependent steps: URL-shortener
//!   expansion before normalization, and [`UrlCanonicalizer::is_valid_link`],
//!   which scopes links to the crawl and follows declared canonical URLs.
//!
//! # Example
//!
//! ```
//! use docmirror_core::canonical::normalize;
//!
//! let a = normalize("HTTP://WWW.Example.com:80/a/../b/").unwrap();
//! let b = normalize("http://www.example.com/b/").unwrap();
//! assert_eq!(a, b);
//! ```

mod normalize;
mod resolve;

pub use normalize::{NormalizedUrl, authority, is_session_param, normalize};
pub use resolve::{SHORTENER_DOMAINS, UrlCanonicalizer, canonical_from_link_header, passes_scope};
