use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use super::{Store, StoreError};
use crate::query::Query;

/// A [`Store`] that keeps nothing.
///
/// Every read is a miss, so every request goes to the loader. Concurrent requests are still
/// coalesced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl Store for NoStore {
    fn get<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        Box::pin(async { Err(StoreError::Miss) })
    }

    fn set<'a>(
        &'a self,
        _query: &'a Query,
        _data: Bytes,
        _ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn mget<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Vec<Result<Bytes, StoreError>>> {
        let len = queries.len();
        Box::pin(async move { vec![Err(StoreError::Miss); len] })
    }

    fn del<'a>(&'a self, _queries: &'a [Query]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn del_bucket<'a>(&'a self, _buckets: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}
