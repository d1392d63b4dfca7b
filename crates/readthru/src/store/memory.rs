use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use super::{Store, StoreError};
use crate::query::Query;

/// The default number of items kept per bucket.
pub const DEFAULT_CAPACITY: u64 = 100_000;

/// Items that live longer than this are kept until capacity runs out.
const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// An item saved in one of the in-memory bucket caches.
#[derive(Clone, Debug)]
struct MemoryItem {
    /// When to evict this item, or `None` to keep it until capacity runs out.
    deadline: Option<Instant>,
    data: Bytes,
}

type BucketCache = moka::sync::Cache<Bytes, MemoryItem>;

/// A struct implementing [`moka::Expiry`] that uses the [`MemoryItem`] deadline as the explicit
/// expiration time.
struct ItemExpiration;

/// Returns the duration between the `current_time` and `target_time` in the future.
/// In case the `target_time` is already elapsed, this will return `Some(ZERO)`.
fn saturating_duration_since(current_time: Instant, target_time: Instant) -> Option<Duration> {
    Some(
        target_time
            .checked_duration_since(current_time)
            .unwrap_or_default()
            .min(MAX_EXPIRY),
    )
}

/// The deadline of an item written now, `None` if it never expires.
fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.filter(|ttl| *ttl < MAX_EXPIRY)
        .and_then(|ttl| Instant::now().checked_add(ttl))
}

impl moka::Expiry<Bytes, MemoryItem> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &Bytes,
        value: &MemoryItem,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline?)
    }

    fn expire_after_update(
        &self,
        _key: &Bytes,
        value: &MemoryItem,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline?)
    }
}

/// A process-local [`Store`].
///
/// Every bucket gets its own moka cache, bounded to `capacity` items, keyed by the canonical
/// query arguments. Deleting a bucket drops its cache as a whole.
pub struct MemoryStore {
    capacity: u64,
    buckets: RwLock<HashMap<String, BucketCache>>,
}

impl MemoryStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            buckets: Default::default(),
        }
    }

    fn bucket(&self, name: &str) -> Option<BucketCache> {
        self.buckets.read().get(name).cloned()
    }

    fn bucket_or_create(&self, name: &str) -> BucketCache {
        if let Some(cache) = self.bucket(name) {
            return cache;
        }

        self.buckets
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| {
                BucketCache::builder()
                    .max_capacity(self.capacity)
                    .name(name)
                    .expire_after(ItemExpiration)
                    .build()
            })
            .clone()
    }

    fn read(&self, query: &Query) -> Result<Bytes, StoreError> {
        let cache = self.bucket(query.bucket()).ok_or(StoreError::Miss)?;
        cache
            .get(query.args())
            .map(|item| item.data)
            .ok_or(StoreError::Miss)
    }

    /// The number of items in all buckets.
    ///
    /// Like [`moka::sync::Cache::entry_count`], this is an estimate that may include expired
    /// items which were not evicted yet.
    pub fn entry_count(&self) -> u64 {
        self.buckets
            .read()
            .values()
            .map(|cache| {
                cache.run_pending_tasks();
                cache.entry_count()
            })
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.read();
        f.debug_struct("MemoryStore")
            .field("capacity", &self.capacity)
            .field("buckets", &buckets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        Box::pin(async move { self.read(query) })
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        data: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let item = MemoryItem {
                deadline: deadline(ttl),
                data,
            };
            self.bucket_or_create(query.bucket())
                .insert(query.args().clone(), item);
            Ok(())
        })
    }

    fn mget<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Vec<Result<Bytes, StoreError>>> {
        Box::pin(async move { queries.iter().map(|query| self.read(query)).collect() })
    }

    fn del<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            for query in queries {
                if let Some(cache) = self.bucket(query.bucket()) {
                    cache.invalidate(query.args());
                }
            }
            Ok(())
        })
    }

    fn del_bucket<'a>(&'a self, buckets: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut all = self.buckets.write();
            for bucket in buckets {
                all.remove(bucket);
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.buckets.write().clear();
            Ok(())
        })
    }
}
