//! Custom key/value tags attached to objects.

use sqlx::FromRow;
use uuid::Uuid;

/// Tag name marking a source object whose thumbnail has been written.
pub const THUMBNAIL_GENERATED_TAG: &str = "thumbnailGenerated";

/// One row of the `object_tags` table.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectTag {
    /// Reference to the tagged object.
    pub object_id: Uuid,

    pub tag_key: String,

    pub tag_value: String,
}
