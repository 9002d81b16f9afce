//! Outcome of one thumbnail job run.

use crate::models::file_metadata::FileMetadata;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One complete scan-and-generate cycle.
///
/// Published as a whole when the run finishes and replaced wholesale by the
/// next one; never mutated after publication.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Thumbnails written during the run, in listing order.
    pub created_thumbnails: Vec<FileMetadata>,
}

impl JobRun {
    /// Placeholder published before the first run completes.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            created_thumbnails: Vec::new(),
        }
    }
}
