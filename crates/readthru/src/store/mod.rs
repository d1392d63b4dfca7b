//! The backing stores which hold encoded items.
//!
//! A [`Store`] only ever sees canonical query identities and opaque bytes. It decides on its
//! own how to evict items, the cache only tells it how long an item may live at most.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::query::Query;

mod memory;
mod noop;

pub use memory::{DEFAULT_CAPACITY, MemoryStore};
pub use noop::NoStore;

/// The outcome of a failed store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The item is not in the store. This is the expected outcome for new items.
    #[error("cache miss")]
    Miss,
    /// The store failed, for example because its backend is unreachable.
    #[error("{0}")]
    Fault(String),
}

impl StoreError {
    /// Creates a [`StoreError::Fault`] from any error.
    pub fn fault(err: impl fmt::Display) -> Self {
        Self::Fault(err.to_string())
    }
}

/// A backend to keep encoded items in.
pub trait Store: Send + Sync + fmt::Debug + 'static {
    /// Reads a single item.
    fn get<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Bytes, StoreError>>;

    /// Writes a single item. An item with a `ttl` of `None` never expires.
    fn set<'a>(
        &'a self,
        query: &'a Query,
        data: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Reads many items at once.
    ///
    /// The returned results must be positionally aligned with `queries`.
    fn mget<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Vec<Result<Bytes, StoreError>>> {
        Box::pin(futures::future::join_all(
            queries.iter().map(|query| self.get(query)),
        ))
    }

    /// Removes the given items.
    fn del<'a>(&'a self, queries: &'a [Query]) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes every item of the given buckets.
    fn del_bucket<'a>(&'a self, buckets: &'a [String]) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Releases the resources of the store.
    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}
