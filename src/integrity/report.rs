//! Aggregate link integrity report.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::checker::LinkIntegrityResult;
use crate::error::CrawlError;
use crate::store::write_atomic;

/// Every result of a run plus the problem buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkIntegrityReport {
    /// Every checked link, sorted by URL.
    pub all_links: Vec<LinkIntegrityResult>,
    /// Links whose final status is 400 or above.
    pub broken_links: Vec<LinkIntegrityResult>,
    /// Links that redirected.
    pub redirects: Vec<LinkIntegrityResult>,
    /// Internal links whose fragment target is missing.
    pub missing_anchors: Vec<LinkIntegrityResult>,
}

impl LinkIntegrityReport {
    /// Partitions `results` into the report buckets.
    #[must_use]
    pub fn from_results(mut results: Vec<LinkIntegrityResult>) -> Self {
        results.sort_by(|a, b| a.url.cmp(&b.url));
        let pick = |keep: fn(&LinkIntegrityResult) -> bool| -> Vec<LinkIntegrityResult> {
            results.iter().filter(|r| keep(r)).cloned().collect()
        };
        let broken_links = pick(LinkIntegrityResult::is_broken);
        let redirects = pick(|r| r.is_redirect);
        let missing_anchors = pick(LinkIntegrityResult::is_missing_anchor);
        Self {
            all_links: results,
            broken_links,
            redirects,
            missing_anchors,
        }
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Database`] if the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), CrawlError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CrawlError::database("serialize link integrity report", e))?;
        write_atomic(path, &json).await?;
        info!(
            path = %path.display(),
            total = self.all_links.len(),
            broken = self.broken_links.len(),
            redirects = self.redirects.len(),
            missing_anchors = self.missing_anchors.len(),
            "link integrity report written"
        );
        Ok(())
    }
}
