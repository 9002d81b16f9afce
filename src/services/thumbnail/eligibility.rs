//! Decides whether an object needs its thumbnail (re)generated.
//!
//! The marker tag alone is not trusted: a tagged object whose thumbnail has
//! disappeared is eligible again, which is how orphaned tags get repaired.

use super::{derived_key, is_derived};
use crate::{
    models::{metadata::THUMBNAIL_GENERATED_TAG, object::ObjectRecord},
    services::storage_service::ObjectStore,
};
use tracing::warn;

/// Outcome of the metadata-only part of the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Content type missing or not `image/*`.
    NotImage,
    /// The object is itself a thumbnail.
    Derived,
    /// No marker tag: generate.
    Untagged,
    /// Marker tag present: generate only if `derived_key` is missing.
    Tagged { derived_key: String },
}

pub fn assess(object: &ObjectRecord, folder: &str) -> Assessment {
    let is_image = object
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Assessment::NotImage;
    }
    if is_derived(folder, &object.name) {
        return Assessment::Derived;
    }
    if object.tag(THUMBNAIL_GENERATED_TAG) == Some("true") {
        Assessment::Tagged {
            derived_key: derived_key(folder, &object.name),
        }
    } else {
        Assessment::Untagged
    }
}

/// Full decision: metadata assessment plus, for tagged objects, a check that
/// the thumbnail really exists in the store.
///
/// A failed existence check skips the object for this run.
pub async fn is_eligible(store: &dyn ObjectStore, folder: &str, object: &ObjectRecord) -> bool {
    match assess(object, folder) {
        Assessment::NotImage | Assessment::Derived => false,
        Assessment::Untagged => true,
        Assessment::Tagged { derived_key } => {
            match store.object_exists(&object.bucket, &derived_key).await {
                Ok(true) => false,
                Ok(false) => {
                    warn!(
                        object = %object.name,
                        thumbnail = %derived_key,
                        "Thumbnail missing for tagged object, will regenerate"
                    );
                    true
                }
                Err(err) => {
                    warn!(
                        object = %object.name,
                        error = %err,
                        "Could not verify thumbnail existence, skipping"
                    );
                    false
                }
            }
        }
    }
}
