//! HTTP handlers for `/api/files`: listing, multipart upload, download, delete.
//! Storage and cache concerns are delegated to `FileService`.

use crate::{
    errors::AppError,
    models::{api_response::ApiResponse, file_metadata::FileMetadata},
    services::file_service::UploadedFile,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
};
use base64::{Engine as _, engine::general_purpose};
use tracing::info;

/// Multipart field carrying the uploaded files.
const FILES_FIELD: &str = "files";

/// GET `/api/files` — cached listing of the configured bucket.
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<FileMetadata>>>, AppError> {
    info!(bucket = %state.files.bucket(), "Fetching list of images");
    let files = state.files.list_files().await?;
    Ok(Json(ApiResponse::success(
        files.to_vec(),
        "Fetched image list successfully",
    )))
}

/// POST `/api/files/upload` — one or more `files` parts.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Vec<FileMetadata>>>, AppError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let original_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        uploads.push(UploadedFile {
            original_name,
            content_type,
            data,
        });
    }

    if uploads.is_empty() {
        return Err(AppError::bad_request(format!(
            "multipart field `{}` is required",
            FILES_FIELD
        )));
    }

    let stored = state.files.upload_files(uploads).await?;
    info!(count = stored.len(), "Files uploaded");
    Ok(Json(ApiResponse::success(stored, "Files uploaded successfully")))
}

/// GET `/api/files/download/{*name}` — object bytes, base64-encoded in `data`.
pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let bytes = state.files.download_file(&name).await?;
    info!(name = %name, size = bytes.len(), "File downloaded");
    Ok(Json(ApiResponse::success(
        general_purpose::STANDARD.encode(&bytes),
        "File downloaded successfully",
    )))
}

/// DELETE `/api/files/{*name}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.files.delete_file(&name).await?;
    Ok(Json(ApiResponse::success(name, "File deleted successfully")))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}
