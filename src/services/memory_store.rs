//! In-memory [`ObjectStore`] used by unit tests.
//!
//! Supports fault injection (failing reads for chosen keys), call counting
//! and a one-shot gate that parks the next listing until released.

use crate::{
    models::object::ObjectRecord,
    services::storage_service::{ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io,
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
};
use tokio::sync::oneshot;

struct StoredObject {
    record: ObjectRecord,
    data: Bytes,
}

/// Handle returned by [`MemoryObjectStore::gate_next_list`].
pub struct ListGate {
    /// Resolves once the gated listing has started.
    pub entered: oneshot::Receiver<()>,
    /// Send to let the gated listing finish.
    pub release: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_tag_writes: Mutex<HashSet<String>>,
    list_gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    list_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    clock: AtomicI64,
}

impl MemoryObjectStore {
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::default();
        store
            .buckets
            .lock()
            .unwrap()
            .insert(bucket.to_string(), BTreeMap::new());
        store
    }

    /// Monotonic fake clock so creation order is deterministic.
    fn tick(&self) -> DateTime<Utc> {
        let step = self.clock.fetch_add(1, Ordering::SeqCst);
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(step)
    }

    /// Insert an object directly, bypassing `put_object`.
    pub fn insert(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        data: impl Into<Bytes>,
        tags: &[(&str, &str)],
    ) {
        let created_at = self.tick();
        self.insert_at(bucket, name, content_type, data, tags, created_at);
    }

    pub fn insert_at(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        data: impl Into<Bytes>,
        tags: &[(&str, &str)],
        created_at: DateTime<Utc>,
    ) {
        let data = data.into();
        let record = ObjectRecord {
            bucket: bucket.to_string(),
            name: name.to_string(),
            content_type: Some(content_type.to_string()),
            size_bytes: data.len() as i64,
            created_at,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), StoredObject { record, data });
    }

    pub fn record(&self, bucket: &str, name: &str) -> Option<ObjectRecord> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .map(|stored| stored.record.clone())
    }

    pub fn data(&self, bucket: &str, name: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .map(|stored| stored.data.clone())
    }

    pub fn remove(&self, bucket: &str, name: &str) {
        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(name);
        }
    }

    pub fn fail_reads_of(&self, name: &str) {
        self.failing_reads.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_tag_writes_of(&self, name: &str) {
        self.failing_tag_writes
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Park the next `list_objects` call until the returned gate is released.
    pub fn gate_next_list(&self) -> ListGate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.list_gate.lock().unwrap() = Some((entered_tx, release_rx));
        ListGate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    fn not_found(bucket: &str, name: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: name.to_string(),
        }
    }

    fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.buckets.lock().unwrap().contains_key(bucket) {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot: Vec<ObjectRecord> = {
            let buckets = self.buckets.lock().unwrap();
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
            objects
                .values()
                .filter(|stored| prefix.is_none_or(|p| stored.record.name.starts_with(p)))
                .map(|stored| stored.record.clone())
                .collect()
        };

        let gate = self.list_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }

        Ok(snapshot)
    }

    async fn get_object(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        self.ensure_bucket(bucket)?;
        if self.failing_reads.lock().unwrap().contains(name) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected read failure",
            )));
        }
        self.data(bucket, name)
            .ok_or_else(|| Self::not_found(bucket, name))
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectRecord> {
        self.ensure_bucket(bucket)?;
        self.insert(bucket, name, content_type, data, &[]);
        self.record(bucket, name)
            .ok_or_else(|| Self::not_found(bucket, name))
    }

    async fn merge_tags(
        &self,
        bucket: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        self.ensure_bucket(bucket)?;
        if self.failing_tag_writes.lock().unwrap().contains(name) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected tag write failure",
            )));
        }
        let mut buckets = self.buckets.lock().unwrap();
        let stored = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(name))
            .ok_or_else(|| Self::not_found(bucket, name))?;
        stored
            .record
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, name: &str) -> StorageResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_bucket(bucket)?;
        Ok(self.record(bucket, name).is_some())
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> StorageResult<()> {
        self.ensure_bucket(bucket)?;
        if self.record(bucket, name).is_none() {
            return Err(Self::not_found(bucket, name));
        }
        self.remove(bucket, name);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn probe(&self) -> StorageResult<()> {
        Ok(())
    }
}
