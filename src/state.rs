//! Shared state handed to every handler.

use crate::services::{file_service::FileService, thumbnail::job::ThumbnailJob};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub job: Arc<ThumbnailJob>,
}
