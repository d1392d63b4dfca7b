//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Stores and loaders that tests inspect afterwards have to be shared with the cache. Pass a
//!    [`FaultyStore`] as `Arc` via [`CacheBuilder::shared_store`], and register a clone of a
//!    [`CountingLoader`], since clones share their counter.
//!
//! [`CacheBuilder::shared_store`]: readthru::CacheBuilder::shared_store

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use readthru::{Loader, MemoryStore, Query, Store, StoreError, Ttl};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `readthru` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("readthru=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The message of every fault reported by a [`FaultyStore`].
pub const FAULT_MESSAGE: &str = "store is unreachable";

/// A [`MemoryStore`] that can be told to fail, and counts how often it is used.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    short_batches: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every read fail from now on.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail from now on.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes batch reads return one result less than they were asked for.
    pub fn short_batches(&self, short: bool) {
        self.short_batches.store(short, Ordering::SeqCst);
    }

    /// The number of items read so far, including failed reads.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// The number of items written so far, including failed writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn fault() -> StoreError {
        StoreError::fault(FAULT_MESSAGE)
    }
}

impl Store for FaultyStore {
    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Box::pin(async { Err(Self::fault()) });
        }
        self.inner.get(query)
    }

    fn set<'a>(
        &'a self,
        query: &'a Query,
        data: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Box::pin(async { Err(Self::fault()) });
        }
        self.inner.set(query, data, ttl)
    }

    fn mget<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Vec<Result<Bytes, StoreError>>> {
        self.reads.fetch_add(queries.len(), Ordering::SeqCst);
        Box::pin(async move {
            let mut results = if self.fail_reads.load(Ordering::SeqCst) {
                queries.iter().map(|_| Err(Self::fault())).collect()
            } else {
                self.inner.mget(queries).await
            };
            if self.short_batches.load(Ordering::SeqCst) {
                results.pop();
            }
            results
        })
    }

    fn del<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.del(queries)
    }

    fn del_bucket<'a>(&'a self, buckets: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.del_bucket(buckets)
    }
}

/// A [`Loader`] that always produces the same value, and counts how often it ran.
#[derive(Debug, Clone)]
pub struct CountingLoader<T> {
    value: T,
    delay: Duration,
    expire: Ttl,
    calls: Arc<AtomicUsize>,
}

impl<T> CountingLoader<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            delay: Duration::ZERO,
            expire: Ttl::Default,
            calls: Default::default(),
        }
    }

    /// Makes every load take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the [`Ttl`] of the produced values.
    pub fn with_expire(mut self, expire: impl Into<Ttl>) -> Self {
        self.expire = expire.into();
        self
    }

    /// The number of loads started so far, by this loader and all of its clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T> Loader<T> for CountingLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn load(&self, _query: Query) -> BoxFuture<'static, anyhow::Result<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.value.clone();
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(value)
        })
    }

    fn expire(&self) -> Ttl {
        self.expire
    }
}
