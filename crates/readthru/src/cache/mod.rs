//! The read-through cache.
//!
//! A [`Cache`] serves values by [`Query`]. It first asks its [`Store`], and on a miss runs the
//! [`Loader`] of the query's bucket, writes the result back to the store and returns it.
//! Concurrent misses of the same item are coalesced through a [`SingleFlight`], so the loader
//! runs at most once per item at a time.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, Codec, JsonCodec};
use crate::config::CacheConfig;
use crate::error::{CacheEntry, CacheError};
use crate::loader::{ErasedLoader, ExpirePolicy, Loader, Ttl, call_loader, loader_fn};
use crate::query::{Query, QueryConfig};
use crate::single_flight::{LoadResult, ShardedSingleFlight, SingleFlight};
use crate::store::{MemoryStore, Store, StoreError};

mod batch;

/// A read-through cache. See the [module level docs](self) for details.
///
/// Values are converted to bytes with the codec `C`, which is [`JsonCodec`] by default. Cloning
/// a cache is cheap, all clones share the same store and loaders.
pub struct Cache<C = JsonCodec> {
    inner: Arc<CacheInner<C>>,
}

struct CacheInner<C> {
    store: Arc<dyn Store>,
    codec: C,
    single_flight: Arc<dyn SingleFlight>,
    loaders: RwLock<HashMap<String, ErasedLoader>>,
    default_expire: ExpirePolicy,
    direct_return_on_store_fault: bool,
    replace_existing_loaders: bool,
}

impl<C> Clone for Cache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Cache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaders = self.inner.loaders.read();
        f.debug_struct("Cache")
            .field("store", &self.inner.store)
            .field("codec", &self.inner.codec)
            .field("single_flight", &self.inner.single_flight)
            .field("loaders", &loaders.keys().collect::<Vec<_>>())
            .field("default_expire", &self.inner.default_expire)
            .field(
                "direct_return_on_store_fault",
                &self.inner.direct_return_on_store_fault,
            )
            .finish()
    }
}

impl Cache {
    /// Starts building a cache with the default [`JsonCodec`].
    pub fn builder() -> CacheBuilder {
        CacheBuilder {
            store: None,
            codec: JsonCodec,
            single_flight: None,
            default_expire: ExpirePolicy::Default,
            direct_return_on_store_fault: true,
            replace_existing_loaders: false,
        }
    }

    /// Creates a cache with the [`JsonCodec`] from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::builder().config(config).build()
    }
}

/// Builder for a [`Cache`]. Created by [`Cache::builder`].
#[must_use]
pub struct CacheBuilder<C = JsonCodec> {
    store: Option<Arc<dyn Store>>,
    codec: C,
    single_flight: Option<Arc<dyn SingleFlight>>,
    default_expire: ExpirePolicy,
    direct_return_on_store_fault: bool,
    replace_existing_loaders: bool,
}

impl<C> CacheBuilder<C> {
    /// Applies all settings from a [`CacheConfig`].
    pub fn config(mut self, config: &CacheConfig) -> Self {
        self.store = Some(config.store.build());
        self.single_flight = Some(config.single_flight.build());
        self.default_expire = config.default_expire;
        self.direct_return_on_store_fault = config.direct_return_on_store_fault;
        self.replace_existing_loaders = config.replace_existing_loaders;
        self
    }

    /// Sets the backing store. Defaults to a [`MemoryStore`].
    pub fn store(mut self, store: impl Store) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets a backing store that is shared with other owners.
    pub fn shared_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the codec.
    pub fn codec<C2>(self, codec: C2) -> CacheBuilder<C2> {
        CacheBuilder {
            store: self.store,
            codec,
            single_flight: self.single_flight,
            default_expire: self.default_expire,
            direct_return_on_store_fault: self.direct_return_on_store_fault,
            replace_existing_loaders: self.replace_existing_loaders,
        }
    }

    /// Sets how concurrent loads are coalesced. Defaults to a [`ShardedSingleFlight`].
    pub fn single_flight(mut self, single_flight: impl SingleFlight) -> Self {
        self.single_flight = Some(Arc::new(single_flight));
        self
    }

    /// Sets the expiration of items whose loader does not define its own.
    pub fn default_expire(mut self, expire: ExpirePolicy) -> Self {
        self.default_expire = expire;
        self
    }

    /// Whether a failing store is reported to the caller right away. Defaults to `true`.
    ///
    /// When disabled, the failure is logged and the item is loaded as if it was a miss. The
    /// same applies to failures when writing a loaded item back to the store.
    pub fn direct_return_on_store_fault(mut self, enabled: bool) -> Self {
        self.direct_return_on_store_fault = enabled;
        self
    }

    /// Whether registering a loader for a bucket that already has one replaces it.
    ///
    /// Defaults to `false`, in which case doing so panics.
    pub fn replace_existing_loaders(mut self, enabled: bool) -> Self {
        self.replace_existing_loaders = enabled;
        self
    }

    pub fn build(self) -> Cache<C> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::default()));
        let single_flight = self
            .single_flight
            .unwrap_or_else(|| Arc::new(ShardedSingleFlight::default()));

        Cache {
            inner: Arc::new(CacheInner {
                store,
                codec: self.codec,
                single_flight,
                loaders: Default::default(),
                default_expire: self.default_expire,
                direct_return_on_store_fault: self.direct_return_on_store_fault,
                replace_existing_loaders: self.replace_existing_loaders,
            }),
        }
    }
}

impl<C: Send + Sync + 'static> Cache<C> {
    /// Registers the loader for `bucket`.
    ///
    /// # Panics
    ///
    /// Panics if `bucket` is empty, or if it already has a loader and replacing loaders was not
    /// enabled with [`CacheBuilder::replace_existing_loaders`].
    pub fn register_loader<T, L>(&self, bucket: impl Into<String>, loader: L)
    where
        T: 'static,
        L: Loader<T>,
    {
        let bucket = bucket.into();
        assert!(!bucket.is_empty(), "bucket name is empty");

        let loader = ErasedLoader::new::<T>(Arc::new(loader));
        let mut loaders = self.inner.loaders.write();
        if loaders.contains_key(&bucket) && !self.inner.replace_existing_loaders {
            panic!("a loader for bucket `{bucket}` is already registered");
        }
        tracing::debug!(%bucket, "registered loader");
        loaders.insert(bucket, loader);
    }

    /// Registers an async closure as the loader for `bucket`.
    ///
    /// # Panics
    ///
    /// See [`register_loader`](Self::register_loader).
    pub fn register_loader_fn<T, F, Fut>(&self, bucket: impl Into<String>, f: F)
    where
        T: 'static,
        F: Fn(Query) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.register_loader::<T, _>(bucket, loader_fn(f))
    }

    /// The loader registered for `bucket`, if there is one producing values of type `T`.
    pub fn loader<T: 'static>(&self, bucket: &str) -> Option<Arc<dyn Loader<T>>> {
        self.inner.loaders.read().get(bucket)?.downcast()
    }

    /// Gets the value of `query`, loading it on a miss.
    pub async fn get<T>(&self, query: &Query) -> CacheEntry<T>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        self.get_with_expire(query, Ttl::Default).await
    }

    /// Like [`get`](Self::get), but a value loaded by this call is stored with `expire`.
    ///
    /// [`Ttl::Default`] falls back to the loader's [`expire`](Loader::expire) and then to the
    /// cache default. A value that is already stored keeps its expiry.
    pub async fn get_with_expire<T>(&self, query: &Query, expire: Ttl) -> CacheEntry<T>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let bucket = query.bucket();
        metric!(counter("cache.access") += 1, "bucket" => bucket);

        let data = match self.inner.store.get(query).await {
            Ok(data) => {
                metric!(counter("cache.hit") += 1, "bucket" => bucket);
                data
            }
            Err(StoreError::Miss) => {
                metric!(counter("cache.miss") += 1, "bucket" => bucket);
                self.load::<T>(query, expire).await?
            }
            Err(StoreError::Fault(err)) => {
                self.tolerate_read_fault(query, err)?;
                self.load::<T>(query, expire).await?
            }
        };

        codec::decode(&self.inner.codec, &data)
    }

    /// Gets the value of a query for `bucket` built from an optional [`QueryConfig`].
    pub async fn query<T>(&self, bucket: &str, config: Option<&QueryConfig>) -> CacheEntry<T>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let query = match config {
            Some(config) => Query::from_config(bucket, config),
            None => Query::new(bucket),
        };
        self.get(&query).await
    }

    /// Writes `value` for `query`, regardless of what is in the store.
    ///
    /// A [`Ttl::Default`] uses the cache's default expiration.
    pub async fn set<T>(&self, query: &Query, value: &T, ttl: Ttl) -> CacheEntry
    where
        C: Codec<T>,
    {
        let data = codec::encode(&self.inner.codec, value)?;
        let ttl = self.resolve_ttl(ttl);
        self.inner
            .store
            .set(query, data, ttl)
            .await
            .map_err(|err| {
                metric!(counter("cache.write.error") += 1, "bucket" => query.bucket());
                CacheError::StoreFault(err.to_string())
            })
    }

    /// Writes `value` for a query of `bucket` built from an optional [`QueryConfig`].
    pub async fn save<T>(
        &self,
        bucket: &str,
        value: &T,
        ttl: Ttl,
        config: Option<&QueryConfig>,
    ) -> CacheEntry
    where
        C: Codec<T>,
    {
        let query = match config {
            Some(config) => Query::from_config(bucket, config),
            None => Query::new(bucket),
        };
        self.set(&query, value, ttl).await
    }

    /// Removes the given items from the store.
    pub async fn del(&self, queries: &[Query]) -> CacheEntry {
        if queries.is_empty() {
            return Ok(());
        }
        self.inner
            .store
            .del(queries)
            .await
            .map_err(|err| CacheError::StoreFault(err.to_string()))
    }

    /// Removes every item of the given buckets from the store.
    pub async fn del_bucket(&self, buckets: &[String]) -> CacheEntry {
        if buckets.is_empty() {
            return Ok(());
        }
        self.inner
            .store
            .del_bucket(buckets)
            .await
            .map_err(|err| CacheError::StoreFault(err.to_string()))
    }

    /// Closes the backing store.
    pub async fn close(&self) -> CacheEntry {
        self.inner
            .store
            .close()
            .await
            .map_err(|err| CacheError::StoreFault(err.to_string()))
    }

    /// Like [`get`](Self::get), but stops waiting once `cancel` is triggered.
    ///
    /// Cancellation only affects the caller. A load that was already started keeps running
    /// and still writes its result to the store.
    pub async fn get_with_cancel<T>(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> CacheEntry<T>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let cache = self.clone();
        let query = query.clone();
        run_cancellable(cancel, async move { cache.get(&query).await }).await
    }

    /// Like [`get`](Self::get), but stops waiting after `timeout`.
    ///
    /// See [`get_with_cancel`](Self::get_with_cancel) for what happens to the load.
    pub async fn get_with_timeout<T>(&self, query: &Query, timeout: Duration) -> CacheEntry<T>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let cancel = CancellationToken::new();
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };
        let result = self.get_with_cancel(query, &cancel).await;
        timer.abort();
        result
    }

    /// Like [`set`](Self::set), but stops waiting once `cancel` is triggered.
    pub async fn set_with_cancel<T>(
        &self,
        query: &Query,
        value: &T,
        ttl: Ttl,
        cancel: &CancellationToken,
    ) -> CacheEntry
    where
        C: Codec<T>,
    {
        // Encoding happens up front, so the spawned write does not need to own the value.
        let data = codec::encode(&self.inner.codec, value)?;
        let ttl = self.resolve_ttl(ttl);
        let store = Arc::clone(&self.inner.store);
        let query = query.clone();
        run_cancellable(cancel, async move {
            store
                .set(&query, data, ttl)
                .await
                .map_err(|err| CacheError::StoreFault(err.to_string()))
        })
        .await
    }

    /// Like [`del`](Self::del), but stops waiting once `cancel` is triggered.
    pub async fn del_with_cancel(&self, queries: &[Query], cancel: &CancellationToken) -> CacheEntry {
        let cache = self.clone();
        let queries = queries.to_vec();
        run_cancellable(cancel, async move { cache.del(&queries).await }).await
    }

    /// Like [`del_bucket`](Self::del_bucket), but stops waiting once `cancel` is triggered.
    pub async fn del_bucket_with_cancel(
        &self,
        buckets: &[String],
        cancel: &CancellationToken,
    ) -> CacheEntry {
        let cache = self.clone();
        let buckets = buckets.to_vec();
        run_cancellable(cancel, async move { cache.del_bucket(&buckets).await }).await
    }

    /// Runs the coalesced load of `query`.
    fn load<T>(&self, query: &Query, expire: Ttl) -> BoxFuture<'static, LoadResult>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let cache = self.clone();
        let owned = query.clone();
        let computation = Box::pin(async move { cache.compute::<T>(owned, expire).await });
        self.inner.single_flight.run(query, computation)
    }

    /// Loads, encodes and stores the value of `query`.
    ///
    /// This is the leader's side of a coalesced load, its result is shared by every waiter.
    async fn compute<T>(self, query: Query, expire: Ttl) -> LoadResult
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let loader = self.resolve_loader::<T>(&query)?;
        let bucket = query.bucket();

        metric!(counter("cache.load") += 1, "bucket" => bucket);
        let value = match call_loader(Arc::clone(&loader), query.clone()).await {
            Ok(value) => value,
            Err(err) => {
                metric!(
                    counter("cache.load.error") += 1,
                    "bucket" => bucket,
                    "error" => err.metrics_tag(),
                );
                tracing::debug!(error = %err, %query, "loader failed");
                return Err(err);
            }
        };

        let data = codec::encode(&self.inner.codec, &value)?;
        let ttl = match expire {
            Ttl::Default => self.resolve_ttl(loader.expire()),
            expire => self.resolve_ttl(expire),
        };

        if let Err(err) = self.inner.store.set(&query, data.clone(), ttl).await {
            metric!(counter("cache.write.error") += 1, "bucket" => bucket);
            if self.inner.direct_return_on_store_fault {
                return Err(CacheError::StoreFault(err.to_string()));
            }
            tracing::error!(
                error = %err,
                %query,
                "failed to write loaded item to the store",
            );
        }

        Ok(data)
    }

    /// The loader for `query`: its own, or the one registered for its bucket.
    fn resolve_loader<T: 'static>(&self, query: &Query) -> Result<Arc<dyn Loader<T>>, CacheError> {
        let loader = match query.loader() {
            Some(loader) => loader.clone(),
            None => self
                .inner
                .loaders
                .read()
                .get(query.bucket())
                .cloned()
                .ok_or_else(|| CacheError::LoaderNotFound {
                    bucket: query.bucket().to_owned(),
                })?,
        };

        loader
            .downcast::<T>()
            .ok_or_else(|| CacheError::LoaderTypeMismatch {
                bucket: query.bucket().to_owned(),
            })
    }

    /// Turns a [`Ttl`] into the expiration handed to the store, `None` meaning never.
    fn resolve_ttl(&self, ttl: Ttl) -> Option<Duration> {
        let ttl = match ttl {
            Ttl::Default => self.inner.default_expire.resolve(),
            ttl => ttl,
        };
        match ttl {
            Ttl::After(duration) => Some(duration),
            Ttl::Never | Ttl::Default => None,
        }
    }

    /// Decides whether a store read failure aborts the request, or falls back to a load.
    fn tolerate_read_fault(&self, query: &Query, err: String) -> CacheEntry {
        metric!(counter("cache.fault") += 1, "bucket" => query.bucket());
        if self.inner.direct_return_on_store_fault {
            return Err(CacheError::StoreFault(err));
        }
        tracing::error!(
            error = %err,
            %query,
            "failed to read from the store, the item will be loaded instead",
        );
        Ok(())
    }
}

/// Runs `future` as its own task, and returns early with [`CacheError::Cancelled`] once
/// `cancel` is triggered. The task keeps running in that case.
async fn run_cancellable<R, F>(cancel: &CancellationToken, future: F) -> Result<R, CacheError>
where
    R: Send + 'static,
    F: Future<Output = Result<R, CacheError>> + Send + 'static,
{
    let task = tokio::spawn(future);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        result = task => match result {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(CacheError::InternalError),
        },
    }
}
