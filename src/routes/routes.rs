//! Defines routes for the file and admin endpoints.
//!
//! ## Structure
//! - **File endpoints** (configured bucket)
//!   - `GET    /api/files` — cached listing, newest first
//!   - `POST   /api/files/upload` — multipart upload (`files` parts)
//!   - `GET    /api/files/download/{*name}` — download (base64 in JSON)
//!   - `DELETE /api/files/{*name}` — delete object
//!
//! - **Admin endpoints**
//!   - `GET /api/admin/thumbnails/last` — thumbnails created by the last job run
//!   - `GET /api/admin/thumbnails/last-run` — last run timing + running flag
//!   - `GET /api/admin/thumbnails` — all objects under the thumbnail folder
//!
//! The wildcard `*name` allows nested keys like `thumbnails/a.jpg`.

use crate::{
    handlers::{
        admin_handlers::{last_created_thumbnails, last_run, list_thumbnails},
        file_handlers::{delete_file, download_file, list_files, upload_files},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Upper bound for one multipart upload request.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build and return the router carrying `AppState` to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/files", get(list_files))
        .route(
            "/api/files/upload",
            post(upload_files).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/files/download/{*name}", get(download_file))
        .route("/api/files/{*name}", delete(delete_file))
        .route("/api/admin/thumbnails", get(list_thumbnails))
        .route("/api/admin/thumbnails/last", get(last_created_thumbnails))
        .route("/api/admin/thumbnails/last-run", get(last_run))
}
