//! src/services/storage_service.rs
//!
//! Object store abstraction used by the listing cache, the file endpoints and
//! the thumbnail job, plus `LocalObjectStore`: metadata and tags in SQLite,
//! payloads on local disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::{
    bucket::Bucket,
    metadata::ObjectTag,
    object::{ObjectRecord, ObjectRow},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket-scoped key → bytes store with per-object metadata and tags.
///
/// Implementations must be safe to share between the request handlers and
/// the background thumbnail job.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object of `bucket`, optionally restricted to keys starting
    /// with `prefix`. Results are complete (no paging visible to callers).
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectRecord>>;

    /// Fetch an object's bytes. Fails with `ObjectNotFound` when absent.
    async fn get_object(&self, bucket: &str, name: &str) -> StorageResult<Bytes>;

    /// Write (or overwrite) an object. An overwritten object starts with no tags.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectRecord>;

    /// Merge `tags` into the object's tag set, keeping unrelated tags.
    async fn merge_tags(
        &self,
        bucket: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()>;

    async fn object_exists(&self, bucket: &str, name: &str) -> StorageResult<bool>;

    async fn delete_object(&self, bucket: &str, name: &str) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Cheap end-to-end check of the backing resources, used by `/readyz`.
    async fn probe(&self) -> StorageResult<()>;
}

/// SQLite + local disk implementation of [`ObjectStore`].
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Return the bucket named `name`, creating it (row and directory) when missing.
    pub async fn ensure_bucket(&self, name: &str) -> StorageResult<Bucket> {
        ensure_bucket_name_safe(name)?;
        match self.fetch_bucket(name).await {
            Ok(bucket) => return Ok(bucket),
            Err(StorageError::BucketNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;
        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => {
                tracing::info!(bucket = %name, "created bucket");
                Ok(bucket)
            }
            // Lost a creation race; the row is there now.
            Err(err) if is_unique_violation(&err) => self.fetch_bucket(name).await,
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Two-level shard identifiers: first two bytes of MD5(bucket/key) as hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Upsert the row and move `tmp_path` over `file_path` inside one
    /// transaction; the rename only happens once the row is written.
    async fn commit_object(
        &self,
        bucket: &Bucket,
        name: &str,
        data: &[u8],
        content_type: &str,
        tmp_path: &Path,
        file_path: &Path,
    ) -> StorageResult<ObjectRow> {
        let etag = format!("{:x}", md5::compute(data));

        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, ObjectRow>(
            r#"
            INSERT INTO objects (id, bucket_id, key, content_type, size_bytes, etag, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                created_at = excluded.created_at
            RETURNING id, key, content_type, size_bytes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(name)
        .bind(content_type)
        .bind(data.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        if let Err(err) = fs::rename(tmp_path, file_path).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(StorageError::Io(err));
            }
            fs::remove_file(file_path).await?;
            fs::rename(tmp_path, file_path).await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT id, key, content_type, size_bytes, created_at
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// All tags of all objects in `bucket`, grouped by object id.
    async fn fetch_bucket_tags(
        &self,
        bucket: &Bucket,
    ) -> StorageResult<HashMap<Uuid, BTreeMap<String, String>>> {
        let rows = sqlx::query_as::<_, ObjectTag>(
            "SELECT t.object_id, t.tag_key, t.tag_value
             FROM object_tags t
             JOIN objects o ON o.id = t.object_id
             WHERE o.bucket_id = ?",
        )
        .bind(bucket.id)
        .fetch_all(&*self.db)
        .await?;

        let mut grouped: HashMap<Uuid, BTreeMap<String, String>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.object_id)
                .or_default()
                .insert(row.tag_key, row.tag_value);
        }
        Ok(grouped)
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectRecord>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, key, content_type, size_bytes, created_at \
             FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);

        if let Some(prefix) = prefix {
            // substr avoids LIKE wildcards inside user-supplied prefixes
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }
        builder.push(" ORDER BY key ASC");

        let rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        let mut tags = self.fetch_bucket_tags(&bucket_rec).await?;

        debug!(bucket = %bucket, count = rows.len(), "listed objects");
        Ok(rows
            .into_iter()
            .map(|row| {
                let object_tags = tags.remove(&row.id).unwrap_or_default();
                row.into_record(&bucket_rec.name, object_tags)
            })
            .collect())
    }

    async fn get_object(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        self.ensure_key_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, name).await?;

        let file_path = self.object_path(&bucket_rec.name, name);
        let data = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: name.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok(Bytes::from(data))
    }

    /// Write the payload to a temp file and fsync it, upsert the metadata row
    /// (dropping tags of the previous version), rename the payload into place
    /// and commit. On failure only the temp file is removed, so a previous
    /// version stays readable.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectRecord> {
        self.ensure_key_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_payload(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let stored = self
            .commit_object(&bucket_rec, name, &data, content_type, &tmp_path, &file_path)
            .await;
        if stored.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        let row = stored?;

        debug!(bucket = %bucket, key = %name, size = data.len(), "stored object");
        Ok(row.into_record(&bucket_rec.name, BTreeMap::new()))
    }

    async fn merge_tags(
        &self,
        bucket: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        self.ensure_key_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, name).await?;

        let mut tx = self.db.begin().await?;
        for (key, value) in tags {
            sqlx::query(
                "INSERT INTO object_tags (object_id, tag_key, tag_value) VALUES (?, ?, ?)
                 ON CONFLICT(object_id, tag_key) DO UPDATE SET tag_value = excluded.tag_value",
            )
            .bind(object.id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn object_exists(&self, bucket: &str, name: &str) -> StorageResult<bool> {
        self.ensure_key_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        match self.fetch_object(&bucket_rec, name).await {
            Ok(_) => Ok(true),
            Err(StorageError::ObjectNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove metadata, tags and payload; prunes empty shard directories.
    async fn delete_object(&self, bucket: &str, name: &str) -> StorageResult<()> {
        self.ensure_key_safe(name)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, name).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let file_path = self.object_path(&bucket_rec.name, name);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.fetch_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(StorageError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// `SELECT 1` against SQLite plus a write/read/delete round trip under `base_path`.
    async fn probe(&self) -> StorageResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::Other,
                format!("unexpected SELECT 1 result: {}", one),
            )));
        }

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

async fn write_payload(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }
    if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

/// Execute the embedded schema, one statement at a time.
pub async fn run_migrations(db: &SqlitePool) -> Result<usize, sqlx::Error> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
