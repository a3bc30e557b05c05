//! Link integrity checking.
//!
//! Every link found on a changed page is checked once per run with a HEAD
//! request that follows redirects by hand, recording status, final URL,
//! redirect chain and content type. Internal links carrying a fragment also
//! have their target page fetched to confirm the anchor exists.
//!
//! Checking is best-effort: a failed request becomes a result with an
//! `error` and never fails the crawl. At the end of a run the results are
//! partitioned into a [`LinkIntegrityReport`].

mod checker;
mod report;

pub use checker::{LinkIntegrityChecker, LinkIntegrityResult, anchor_exists};
pub use report::LinkIntegrityReport;
