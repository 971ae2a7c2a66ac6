//! Export collaborator for the comparison surface.

use crate::compare::ComparisonResult;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes a comparison somewhere outside the process.
///
/// Returns `false` on failure. An export never touches session state, so a
/// failed one can simply be retried.
pub trait ReportExporter: Send + Sync {
    fn export(&self, surface: &ComparisonResult, filename: &str) -> bool;
}

/// `tokenomics-comparison-<unix-seconds>.json`
pub fn default_filename(now: SystemTime) -> String {
    let secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("tokenomics-comparison-{}.json", secs)
}
