//! File operations behind the `/api/files` and `/api/admin` endpoints.
//!
//! Every successful write goes through here so the listing cache of the
//! bucket is invalidated exactly when the bucket changed.

use crate::{
    models::file_metadata::FileMetadata,
    services::{
        listing_cache::ListingCache,
        storage_service::{ObjectStore, StorageResult},
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One file received from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn ObjectStore>,
    cache: ListingCache,
    bucket: String,
    thumbnail_folder: String,
    public_base_url: String,
}

impl FileService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: ListingCache,
        bucket: impl Into<String>,
        thumbnail_folder: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            bucket: bucket.into(),
            thumbnail_folder: thumbnail_folder.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Cached listing of the bucket, newest first.
    pub async fn list_files(&self) -> StorageResult<Arc<[FileMetadata]>> {
        self.cache.get(&self.bucket).await
    }

    /// Store each file as `<uuid><original extension>`.
    ///
    /// The listing cache is invalidated once any file was written, also when
    /// a later file of the batch fails.
    pub async fn upload_files(&self, files: Vec<UploadedFile>) -> StorageResult<Vec<FileMetadata>> {
        let mut stored = Vec::with_capacity(files.len());
        let mut failure = None;

        for file in files {
            let original = file.original_name.as_deref().unwrap_or_default();
            let object_name = format!("{}{}", Uuid::new_v4(), file_extension(original));
            let content_type = file.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);

            match self
                .store
                .put_object(&self.bucket, &object_name, file.data, content_type)
                .await
            {
                Ok(record) => {
                    let metadata = FileMetadata::from_record(&record, &self.public_base_url);
                    info!(original = %original, url = %metadata.url, "File uploaded successfully");
                    stored.push(metadata);
                }
                Err(err) => {
                    error!(original = %original, error = %err, "Failed to upload file");
                    failure = Some(err);
                    break;
                }
            }
        }

        if !stored.is_empty() {
            self.cache.invalidate(&self.bucket).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(stored),
        }
    }

    pub async fn download_file(&self, name: &str) -> StorageResult<Bytes> {
        info!(bucket = %self.bucket, name = %name, "Downloading file");
        self.store.get_object(&self.bucket, name).await
    }

    pub async fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.store.delete_object(&self.bucket, name).await?;
        self.cache.invalidate(&self.bucket).await;
        info!(bucket = %self.bucket, name = %name, "File deleted");
        Ok(())
    }

    /// Every object currently stored under the thumbnail folder.
    pub async fn list_thumbnails(&self) -> StorageResult<Vec<FileMetadata>> {
        let prefix = format!("{}/", self.thumbnail_folder);
        let thumbnails: Vec<FileMetadata> = self
            .store
            .list_objects(&self.bucket, Some(&prefix))
            .await?
            .iter()
            // skip folder placeholders
            .filter(|record| !record.name.ends_with('/'))
            .map(|record| FileMetadata::from_record(record, &self.public_base_url))
            .collect();
        info!(
            bucket = %self.bucket,
            folder = %self.thumbnail_folder,
            count = thumbnails.len(),
            "Found thumbnails"
        );
        Ok(thumbnails)
    }
}

/// Extension of the last path segment including the dot, or `""`.
fn file_extension(filename: &str) -> &str {
    let segment = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match segment.rfind('.') {
        Some(idx)
            if idx + 1 < segment.len()
                && segment[idx + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            &segment[idx..]
        }
        _ => "",
    }
}
