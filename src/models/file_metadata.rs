//! Client-facing description of a stored file.

use crate::models::object::ObjectRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File description returned by listing, upload and admin endpoints.
///
/// Built fresh from an [`ObjectRecord`] on every listing or job run; never
/// persisted on its own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,

    /// Public URL of the object: `<public_base_url>/<bucket>/<name>`.
    pub url: String,

    pub bucket: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    pub created_at: DateTime<Utc>,
}

impl FileMetadata {
    pub fn from_record(record: &ObjectRecord, public_base_url: &str) -> Self {
        Self {
            name: record.name.clone(),
            url: public_url(public_base_url, &record.bucket, &record.name),
            bucket: record.bucket.clone(),
            content_type: record.content_type.clone(),
            size_bytes: record.size_bytes,
            created_at: record.created_at,
        }
    }
}

/// Deterministic public URL for an object.
pub fn public_url(base: &str, bucket: &str, name: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, name)
}
