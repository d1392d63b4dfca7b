//! Fetching many items at once.

use std::collections::HashMap;

use futures::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;

use super::{Cache, run_cancellable};
use crate::codec::{self, Codec};
use crate::error::{BatchError, CacheEntry, CacheError};
use crate::loader::Ttl;
use crate::query::{Query, QueryConfig};
use crate::single_flight::LoadResult;
use crate::store::StoreError;

impl<C: Send + Sync + 'static> Cache<C> {
    /// Gets the values of many queries at once.
    ///
    /// The results are positionally aligned with `queries`. Queries with the same
    /// [`global_id`](Query::global_id) are fetched only once, and every duplicate receives a
    /// copy of the result. Each query's [`error`](Query::error) is updated with its outcome.
    ///
    /// # Panics
    ///
    /// Panics if the store returns a different number of results than it was asked for.
    pub async fn mget<T>(&self, queries: &[Query]) -> Vec<CacheEntry<T>>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let results = self.mget_encoded::<T>(queries).await;

        results
            .into_iter()
            .zip(queries)
            .map(|(result, query)| {
                let entry = result.and_then(|data| codec::decode(&self.inner.codec, &data));
                query.set_error(entry.as_ref().err().cloned());
                entry
            })
            .collect()
    }

    /// Gets the values of many queries and appends them to `dest`.
    ///
    /// A query that failed contributes `T::default()`, so `dest` always ends up with one value
    /// per query. The returned [`BatchError`] holds every failure by position.
    ///
    /// # Panics
    ///
    /// Panics if `dest` is not empty.
    pub async fn mget_into<T>(&self, queries: &[Query], dest: &mut Vec<T>) -> Result<(), BatchError>
    where
        T: Default + Send + 'static,
        C: Codec<T>,
    {
        assert!(
            dest.is_empty(),
            "destination of a batch must be empty, it has {} elements",
            dest.len()
        );

        let entries = self.mget::<T>(queries).await;
        dest.reserve(entries.len());

        let errors = entries
            .into_iter()
            .map(|entry| match entry {
                Ok(value) => {
                    dest.push(value);
                    None
                }
                Err(err) => {
                    dest.push(T::default());
                    Some(err)
                }
            })
            .collect();

        BatchError::from_slots(errors).map_or(Ok(()), Err)
    }

    /// Gets the values of many queries into a slice of the same length.
    ///
    /// Slots of failed queries are reset to `T::default()`.
    ///
    /// # Panics
    ///
    /// Panics if `dest` and `queries` differ in length.
    pub async fn mget_slice<T>(&self, queries: &[Query], dest: &mut [T]) -> Result<(), BatchError>
    where
        T: Default + Send + 'static,
        C: Codec<T>,
    {
        assert_eq!(
            dest.len(),
            queries.len(),
            "destination of a batch must have one slot per query"
        );

        let entries = self.mget::<T>(queries).await;

        let errors = entries
            .into_iter()
            .zip(dest.iter_mut())
            .map(|(entry, slot)| match entry {
                Ok(value) => {
                    *slot = value;
                    None
                }
                Err(err) => {
                    *slot = T::default();
                    Some(err)
                }
            })
            .collect();

        BatchError::from_slots(errors).map_or(Ok(()), Err)
    }

    /// Gets the values of many queries of one `bucket`, built from [`QueryConfig`]s.
    ///
    /// Every config receives the outcome of its query through [`QueryConfig::error`].
    ///
    /// # Panics
    ///
    /// See [`mget_into`](Self::mget_into).
    pub async fn mquery<T>(
        &self,
        bucket: &str,
        configs: &[QueryConfig],
        dest: &mut Vec<T>,
    ) -> Result<(), BatchError>
    where
        T: Default + Send + 'static,
        C: Codec<T>,
    {
        let queries: Vec<_> = configs
            .iter()
            .map(|config| Query::from_config(bucket, config))
            .collect();
        self.mget_into(&queries, dest).await
    }

    /// Like [`mget`](Self::mget), but stops waiting once `cancel` is triggered.
    pub async fn mget_with_cancel<T>(
        &self,
        queries: &[Query],
        cancel: &CancellationToken,
    ) -> Result<Vec<CacheEntry<T>>, CacheError>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        let cache = self.clone();
        let queries = queries.to_vec();
        run_cancellable(cancel, async move { Ok(cache.mget(&queries).await) }).await
    }

    /// Fetches the encoded items of `queries`, loading the ones the store does not have.
    async fn mget_encoded<T>(&self, queries: &[Query]) -> Vec<LoadResult>
    where
        T: Send + 'static,
        C: Codec<T>,
    {
        if queries.is_empty() {
            return Vec::new();
        }

        // Maps each query to the position of the first query with the same identity.
        let mut positions = HashMap::with_capacity(queries.len());
        let mut unique = Vec::with_capacity(queries.len());
        let mapping: Vec<usize> = queries
            .iter()
            .map(|query| {
                *positions.entry(query.global_id()).or_insert_with(|| {
                    unique.push(query.clone());
                    unique.len() - 1
                })
            })
            .collect();

        let stored = self.inner.store.mget(&unique).await;
        assert_eq!(
            stored.len(),
            unique.len(),
            "store returned {} results for {} queries",
            stored.len(),
            unique.len()
        );

        let fetches = stored.into_iter().zip(&unique).map(|(result, query)| {
            let bucket = query.bucket();
            metric!(counter("cache.access") += 1, "bucket" => bucket);

            let fetch: BoxFuture<'static, LoadResult> = match result {
                Ok(data) => {
                    metric!(counter("cache.hit") += 1, "bucket" => bucket);
                    Box::pin(future::ready(Ok(data)))
                }
                Err(StoreError::Miss) => {
                    metric!(counter("cache.miss") += 1, "bucket" => bucket);
                    self.load::<T>(query, Ttl::Default)
                }
                Err(StoreError::Fault(err)) => match self.tolerate_read_fault(query, err) {
                    Ok(()) => self.load::<T>(query, Ttl::Default),
                    Err(err) => Box::pin(future::ready(Err(err))),
                },
            };
            fetch
        });
        let results = future::join_all(fetches).await;

        if unique.len() == queries.len() {
            return results;
        }

        metric!(
            histogram("cache.batch.duplicates") = (queries.len() - unique.len()) as u64
        );
        mapping
            .into_iter()
            .map(|position| results[position].clone())
            .collect()
    }
}
