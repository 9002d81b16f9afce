//! Per-bucket memo of "list all objects", dropped on every successful write.
//!
//! Each bucket slot carries a generation counter. A miss records the
//! generation before listing and only stores its result if no invalidation
//! bumped the counter meanwhile, so an invalidate that races a populate is
//! never lost.

use crate::{
    models::file_metadata::FileMetadata,
    services::storage_service::{ObjectStore, StorageResult},
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
struct CacheEntry {
    value: Arc<[FileMetadata]>,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct BucketSlot {
    entry: Option<CacheEntry>,
    generation: u64,
}

#[derive(Clone)]
pub struct ListingCache {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
    slots: Arc<RwLock<HashMap<String, BucketSlot>>>,
}

impl ListingCache {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the listing of `bucket`, newest first.
    ///
    /// A hit returns the stored sequence as-is; a miss lists the bucket,
    /// sorts by `created_at` descending (name ascending on ties) and stores
    /// the result unless the bucket was invalidated while listing.
    pub async fn get(&self, bucket: &str) -> StorageResult<Arc<[FileMetadata]>> {
        let generation = {
            let slots = self.slots.read().await;
            match slots.get(bucket) {
                Some(BucketSlot {
                    entry: Some(entry), ..
                }) => {
                    debug!(bucket = %bucket, cached_at = %entry.inserted_at, "listing cache hit");
                    return Ok(entry.value.clone());
                }
                Some(slot) => slot.generation,
                None => 0,
            }
        };

        info!(bucket = %bucket, "Listing files in bucket");
        let mut files: Vec<FileMetadata> = self
            .store
            .list_objects(bucket, None)
            .await?
            .iter()
            .map(|record| FileMetadata::from_record(record, &self.public_base_url))
            .collect();
        files.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        let value: Arc<[FileMetadata]> = files.into();
        info!(bucket = %bucket, total = value.len(), "Total files found in bucket");

        let mut slots = self.slots.write().await;
        let slot = slots.entry(bucket.to_string()).or_default();
        if slot.generation == generation {
            // Another miss may have stored first; keep whichever landed.
            let entry = slot.entry.get_or_insert_with(|| CacheEntry {
                value: value.clone(),
                inserted_at: Utc::now(),
            });
            Ok(entry.value.clone())
        } else {
            debug!(bucket = %bucket, "listing invalidated while populating, not caching");
            Ok(value)
        }
    }

    /// Drop the cached listing of `bucket` unconditionally.
    pub async fn invalidate(&self, bucket: &str) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(bucket.to_string()).or_default();
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        debug!(bucket = %bucket, generation = slot.generation, "listing cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryObjectStore;
    use chrono::TimeZone;

    fn cache_over(store: &Arc<MemoryObjectStore>) -> ListingCache {
        ListingCache::new(store.clone(), "https://storage.example.com")
    }

    #[tokio::test]
    async fn miss_lists_and_sorts_newest_first_with_name_tiebreak() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        store.insert_at("photos", "old.jpg", "image/jpeg", "x", &[], t0);
        store.insert_at("photos", "b.jpg", "image/jpeg", "x", &[], t1);
        store.insert_at("photos", "a.jpg", "image/jpeg", "x", &[], t1);

        let files = cache_over(&store).get("photos").await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "old.jpg"]);
        assert_eq!(files[0].url, "https://storage.example.com/photos/a.jpg");
    }

    #[tokio::test]
    async fn hit_does_not_relist_and_returns_identical_sequence() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "a.jpg", "image/jpeg", "x", &[]);
        let cache = cache_over(&store);

        let first = cache.get("photos").await.unwrap();
        store.insert("photos", "b.jpg", "image/jpeg", "x", &[]);
        let second = cache.get("photos").await.unwrap();

        assert_eq!(store.list_calls(), 1);
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_listing() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "a.jpg", "image/jpeg", "x", &[]);
        let cache = cache_over(&store);

        assert_eq!(cache.get("photos").await.unwrap().len(), 1);
        store.insert("photos", "b.jpg", "image/jpeg", "x", &[]);
        cache.invalidate("photos").await;

        let files = cache.get("photos").await.unwrap();
        assert_eq!(store.list_calls(), 2);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "b.jpg");
    }

    #[tokio::test]
    async fn invalidate_during_populate_is_not_lost() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("photos", "a.jpg", "image/jpeg", "x", &[]);
        let cache = cache_over(&store);

        let gate = store.gate_next_list();
        let populating = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("photos").await.unwrap() }
        });

        gate.entered.await.unwrap();
        store.insert("photos", "b.jpg", "image/jpeg", "x", &[]);
        cache.invalidate("photos").await;
        gate.release.send(()).unwrap();

        let stale = populating.await.unwrap();
        assert_eq!(stale.len(), 1);

        let fresh = cache.get("photos").await.unwrap();
        assert_eq!(store.list_calls(), 2);
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn invalidation_is_per_bucket() {
        let store = Arc::new(MemoryObjectStore::with_bucket("photos"));
        store.insert("docs", "readme.txt", "text/plain", "x", &[]);
        store.insert("photos", "a.jpg", "image/jpeg", "x", &[]);
        let cache = cache_over(&store);

        cache.get("photos").await.unwrap();
        cache.get("docs").await.unwrap();
        cache.invalidate("docs").await;
        cache.get("photos").await.unwrap();

        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_cached() {
        let store = Arc::new(MemoryObjectStore::default());
        let cache = cache_over(&store);

        assert!(cache.get("photos").await.unwrap_err().is_not_found());
        assert!(cache.get("photos").await.is_err());
        assert_eq!(store.list_calls(), 2);
    }
}
