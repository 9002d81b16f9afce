//! Thumbnail generation: which objects need one, how it is produced, and the
//! recurring job that drives both.

pub mod eligibility;
pub mod generator;
pub mod job;

use crate::services::storage_service::StorageError;
use thiserror::Error;

/// Per-object failure while producing a thumbnail. Never aborts a run.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode thumbnail: {0}")]
    Encode(#[from] image::ImageError),
    #[error("thumbnail task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Key of the thumbnail derived from `name`: `<folder>/<name>` with exactly
/// one folder segment, whatever prefix `name` already carries.
pub fn derived_key(folder: &str, name: &str) -> String {
    format!("{}/{}", folder, strip_folder(folder, name))
}

/// Strip every leading `<folder>/` (and stray slashes after it) from `name`.
fn strip_folder<'a>(folder: &str, mut name: &'a str) -> &'a str {
    while let Some(rest) = name
        .strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        name = rest.trim_start_matches('/');
    }
    name
}

/// True when `name` lives under the thumbnail folder.
pub fn is_derived(folder: &str, name: &str) -> bool {
    name.strip_prefix(folder)
        .is_some_and(|rest| rest.starts_with('/'))
}
