//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Snapshot of a single object as returned by the object store.
///
/// Records are immutable views taken at read time; later writes to the
/// store are not reflected in an already-fetched record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    /// Bucket the object belongs to.
    pub bucket: String,

    /// Object key, unique within the bucket (path-like, e.g. `thumbnails/a.jpg`).
    pub name: String,

    /// Content type (MIME type), if the uploader supplied one.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// When this version of the object was written.
    pub created_at: DateTime<Utc>,

    /// Custom key/value tags attached to the object.
    pub tags: BTreeMap<String, String>,
}

impl ObjectRecord {
    /// Returns the tag value stored under `key`, if any.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Row shape of the `objects` table.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRow {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key.
    pub key: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    pub created_at: DateTime<Utc>,
}

impl ObjectRow {
    pub fn into_record(self, bucket: &str, tags: BTreeMap<String, String>) -> ObjectRecord {
        ObjectRecord {
            bucket: bucket.to_string(),
            name: self.key,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            tags,
        }
    }
}
