//! The identity of cached items.
//!
//! A [`Query`] names one item by its bucket and arguments. The arguments are canonicalized
//! once, on construction, and hashed together with the bucket into a [`global_id`]. Two
//! queries with the same bucket and canonical arguments refer to the same item, even if the
//! argument values had different Rust types.
//!
//! [`global_id`]: Query::global_id

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CacheError;
use crate::loader::{ErasedLoader, Loader};

mod args;
mod config;

pub use args::{canonicalize, global_id};
pub use config::QueryConfig;

type Meta = Arc<dyn Any + Send + Sync>;
type ErrorSlot = Arc<Mutex<Option<CacheError>>>;

/// The identity of a single cache item.
///
/// Cloning a query is cheap, all clones share the same state.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    bucket: String,
    args: Bytes,
    global_id: u64,
    meta: Option<Meta>,
    loader: Option<ErasedLoader>,
    error: ErrorSlot,
}

impl Query {
    /// Creates a query without arguments.
    ///
    /// # Panics
    ///
    /// Panics if `bucket` is empty.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::builder(bucket).build()
    }

    /// Starts building a query for `bucket`.
    ///
    /// # Panics
    ///
    /// Panics if `bucket` is empty.
    pub fn builder(bucket: impl Into<String>) -> QueryBuilder {
        let bucket = bucket.into();
        assert!(!bucket.is_empty(), "bucket name is empty");

        QueryBuilder {
            bucket,
            args: Vec::new(),
            meta: None,
            loader: None,
            error: None,
        }
    }

    /// Creates a query for `bucket` from a reusable [`QueryConfig`].
    ///
    /// The query shares its error slot with the config.
    pub fn from_config(bucket: impl Into<String>, config: &QueryConfig) -> Self {
        let mut builder = Self::builder(bucket);
        builder.args = config.args.clone();
        builder.meta = config.meta.clone();
        builder.loader = config.loader.clone();
        builder.error = Some(config.error.clone());
        builder.build()
    }

    /// The bucket this query belongs to.
    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    /// The canonical arguments.
    pub fn args(&self) -> &Bytes {
        &self.inner.args
    }

    /// The canonical arguments as text.
    ///
    /// Arguments that are not valid UTF-8, which can only happen with raw byte arguments, are
    /// converted lossily.
    pub fn args_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.inner.args)
    }

    /// The global identity of this query.
    pub fn global_id(&self) -> u64 {
        self.inner.global_id
    }

    /// The metadata attached to this query, if it is of type `M`.
    pub fn meta<M: Any>(&self) -> Option<&M> {
        self.inner.meta.as_deref()?.downcast_ref()
    }

    /// The error recorded by the last batch operation this query took part in.
    pub fn error(&self) -> Option<CacheError> {
        self.inner.error.lock().clone()
    }

    pub(crate) fn set_error(&self, error: Option<CacheError>) {
        *self.inner.error.lock() = error;
    }

    pub(crate) fn loader(&self) -> Option<&ErasedLoader> {
        self.inner.loader.as_ref()
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.inner.bucket == other.inner.bucket && self.inner.args == other.inner.args
    }
}

impl Eq for Query {}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bucket())?;
        if !self.inner.args.is_empty() {
            write!(f, "?{}", self.args_text())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("bucket", &self.inner.bucket)
            .field("args", &self.args_text())
            .field("global_id", &format_args!("{:016x}", self.inner.global_id))
            .field("has_meta", &self.inner.meta.is_some())
            .field("has_loader", &self.inner.loader.is_some())
            .finish()
    }
}

/// Builder for a [`Query`]. Created by [`Query::builder`].
#[must_use]
pub struct QueryBuilder {
    bucket: String,
    args: Vec<u8>,
    meta: Option<Meta>,
    loader: Option<ErasedLoader>,
    error: Option<ErrorSlot>,
}

impl QueryBuilder {
    /// Sets the arguments, which are canonicalized right away.
    pub fn args<A>(mut self, args: &A) -> Self
    where
        A: Serialize + ?Sized,
    {
        self.args = canonicalize(args);
        self
    }

    /// Sets raw bytes as the canonical arguments.
    pub fn raw_args(mut self, args: impl Into<Vec<u8>>) -> Self {
        self.args = args.into();
        self
    }

    /// Attaches metadata for use by the loader. Metadata is not part of the identity.
    pub fn meta<M: Any + Send + Sync>(mut self, meta: M) -> Self {
        self.meta = Some(Arc::new(meta));
        self
    }

    /// Sets a loader that takes precedence over the one registered for the bucket.
    pub fn loader<T, L>(mut self, loader: L) -> Self
    where
        T: 'static,
        L: Loader<T>,
    {
        self.loader = Some(ErasedLoader::new::<T>(Arc::new(loader)));
        self
    }

    pub fn build(self) -> Query {
        let global_id = global_id(&self.bucket, &self.args);
        Query {
            inner: Arc::new(QueryInner {
                bucket: self.bucket,
                args: Bytes::from(self.args),
                global_id,
                meta: self.meta,
                loader: self.loader,
                error: self.error.unwrap_or_default(),
            }),
        }
    }
}
