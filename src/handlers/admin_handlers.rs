//! Admin endpoints exposing the thumbnail job.

use crate::{
    errors::AppError,
    models::{api_response::ApiResponse, file_metadata::FileMetadata, job_run::JobRun},
    state::AppState,
};
use axum::{Json, extract::State};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub running: bool,
    pub last_run: JobRun,
}

/// GET `/api/admin/thumbnails/last` — thumbnails created by the last completed run.
pub async fn last_created_thumbnails(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<FileMetadata>>> {
    let thumbnails = state.job.last_run_results();
    info!(count = thumbnails.len(), "Returning thumbnails of last job run");
    Json(ApiResponse::success(
        thumbnails,
        "Thumbnails generated in last job run",
    ))
}

/// GET `/api/admin/thumbnails/last-run` — timing and state of the job.
pub async fn last_run(State(state): State<AppState>) -> Json<ApiResponse<JobStatus>> {
    let status = JobStatus {
        running: state.job.is_running(),
        last_run: state.job.last_run().as_ref().clone(),
    };
    Json(ApiResponse::success(status, "Thumbnail job status"))
}

/// GET `/api/admin/thumbnails` — everything under the thumbnail folder.
pub async fn list_thumbnails(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<FileMetadata>>>, AppError> {
    let thumbnails = state.files.list_thumbnails().await?;
    Ok(Json(ApiResponse::success(
        thumbnails,
        "Thumbnails stored in bucket",
    )))
}
