//! Structured results of a sync run.

use serde::Serialize;

/// Knobs for one sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Analyze and report, write nothing.
    pub dry_run: bool,
    /// Update every matched channel even if nothing visibly changed.
    pub force_update: bool,
}

/// One group that could not be processed. The rest of the run continues.
#[derive(Debug, Clone, Serialize)]
pub struct SyncItemError {
    pub group_id: String,
    pub error: String,
    /// Whether a later run can be expected to succeed without operator
    /// intervention.
    pub recoverable: bool,
}

/// What a sync run did, by external group id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<SyncItemError>,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}
