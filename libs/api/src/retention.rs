use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub cameras: u64,
    pub examined: u64,
    pub storage_deleted: u64,
    pub metadata_deleted: u64,
    pub errors: u64,
}
