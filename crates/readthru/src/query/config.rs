use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use super::{ErrorSlot, Meta, canonicalize};
use crate::error::CacheError;
use crate::loader::{ErasedLoader, Loader, loader_fn};
use crate::query::Query;

/// A reusable description of a query, without its bucket.
///
/// Batch queries through [`Cache::mquery`](crate::Cache::mquery) record the outcome of each
/// item in its config, see [`error`](Self::error).
#[derive(Default)]
pub struct QueryConfig {
    pub(super) args: Vec<u8>,
    pub(super) meta: Option<Meta>,
    pub(super) loader: Option<ErasedLoader>,
    pub(super) error: ErrorSlot,
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the arguments, which are canonicalized right away.
    pub fn args<A>(mut self, args: &A) -> Self
    where
        A: Serialize + ?Sized,
    {
        self.args = canonicalize(args);
        self
    }

    pub fn meta<M: Any + Send + Sync>(mut self, meta: M) -> Self {
        self.meta = Some(Arc::new(meta));
        self
    }

    pub fn loader<T, L>(mut self, loader: L) -> Self
    where
        T: 'static,
        L: Loader<T>,
    {
        self.loader = Some(ErasedLoader::new::<T>(Arc::new(loader)));
        self
    }

    /// Shorthand for `.loader(loader_fn(f))`.
    pub fn loader_fn<T, F, Fut>(self, f: F) -> Self
    where
        T: 'static,
        F: Fn(Query) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.loader::<T, _>(loader_fn(f))
    }

    /// The error of the last batch query that used this config, if it failed.
    pub fn error(&self) -> Option<CacheError> {
        self.error.lock().clone()
    }
}

impl fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("args", &String::from_utf8_lossy(&self.args))
            .field("has_meta", &self.meta.is_some())
            .field("has_loader", &self.loader.is_some())
            .field("error", &self.error())
            .finish()
    }
}
