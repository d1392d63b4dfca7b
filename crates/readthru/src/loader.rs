//! Loaders produce values for queries that are not in the store.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::query::Query;

/// How long a freshly written item lives in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ttl {
    /// Defer to the next level: the loader, then the cache's default policy.
    #[default]
    Default,
    /// The item never expires.
    Never,
    /// The item expires after the given duration.
    After(Duration),
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Default
        } else {
            Self::After(duration)
        }
    }
}

/// A configurable expiration policy.
///
/// Unlike a [`Ttl`], a policy may describe a range. Every call to [`resolve`](Self::resolve)
/// picks a new random duration within that range, which spreads out the expiration of items
/// that were loaded at the same time.
///
/// In configuration files, a policy is written as `never`, a duration like `30s`, or a range
/// like `{min: 30s, max: 1m}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "ExpireRepr", into = "ExpireRepr")]
pub enum ExpirePolicy {
    #[default]
    Default,
    Never,
    After(Duration),
    Between(Duration, Duration),
}

impl ExpirePolicy {
    /// Picks the [`Ttl`] for one write.
    pub fn resolve(&self) -> Ttl {
        match *self {
            Self::Default => Ttl::Default,
            Self::Never => Ttl::Never,
            Self::After(duration) => Ttl::from(duration),
            Self::Between(min, max) if !min.is_zero() && max > min => {
                Ttl::After(rand::rng().random_range(min..max))
            }
            Self::Between(min, _) => Ttl::from(min),
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum ExpireRepr {
    Range {
        #[serde(with = "humantime_serde")]
        min: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
    Text(String),
}

impl TryFrom<ExpireRepr> for ExpirePolicy {
    type Error = humantime::DurationError;

    fn try_from(repr: ExpireRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            ExpireRepr::Range { min, max } => Self::Between(min, max),
            ExpireRepr::Text(text) => match text.as_str() {
                "default" => Self::Default,
                "never" => Self::Never,
                other => Self::After(humantime::parse_duration(other)?),
            },
        })
    }
}

impl From<ExpirePolicy> for ExpireRepr {
    fn from(policy: ExpirePolicy) -> Self {
        match policy {
            ExpirePolicy::Default => Self::Text("default".into()),
            ExpirePolicy::Never => Self::Text("never".into()),
            ExpirePolicy::After(duration) => {
                Self::Text(humantime::format_duration(duration).to_string())
            }
            ExpirePolicy::Between(min, max) => Self::Range { min, max },
        }
    }
}

/// Produces the value for a [`Query`] on a cache miss.
///
/// The future returned by [`load`](Self::load) may be run in the background, so it has to be
/// `'static`. It is polled at most once per identity at a time, no matter how many callers
/// are waiting for it.
pub trait Loader<T>: Send + Sync + 'static {
    /// Loads the value for `query`.
    fn load(&self, query: Query) -> BoxFuture<'static, anyhow::Result<T>>;

    /// The [`Ttl`] of a value produced by this loader.
    fn expire(&self) -> Ttl {
        Ttl::Default
    }
}

impl<T, L> Loader<T> for Arc<L>
where
    L: Loader<T> + ?Sized,
{
    fn load(&self, query: Query) -> BoxFuture<'static, anyhow::Result<T>> {
        (**self).load(query)
    }

    fn expire(&self) -> Ttl {
        (**self).expire()
    }
}

/// A [`Loader`] backed by a closure. Created by [`loader_fn`].
#[derive(Clone)]
pub struct FnLoader<F> {
    f: F,
    expire: ExpirePolicy,
}

/// Creates a [`Loader`] from an async closure.
///
/// ```
/// use std::time::Duration;
/// use readthru::{loader_fn, ExpirePolicy, Query};
///
/// let loader = loader_fn(|query: Query| async move {
///     Ok::<_, anyhow::Error>(format!("hello {}", query.args_text()))
/// })
/// .with_expire(ExpirePolicy::Between(Duration::from_secs(30), Duration::from_secs(60)));
/// # let _ = loader;
/// ```
pub fn loader_fn<T, F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(Query) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    FnLoader {
        f,
        expire: ExpirePolicy::Default,
    }
}

impl<F> FnLoader<F> {
    /// Sets the expiration policy of values produced by this loader.
    pub fn with_expire(mut self, expire: ExpirePolicy) -> Self {
        self.expire = expire;
        self
    }
}

impl<F> fmt::Debug for FnLoader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader")
            .field("expire", &self.expire)
            .finish_non_exhaustive()
    }
}

impl<T, F, Fut> Loader<T> for FnLoader<F>
where
    F: Fn(Query) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn load(&self, query: Query) -> BoxFuture<'static, anyhow::Result<T>> {
        Box::pin((self.f)(query))
    }

    fn expire(&self) -> Ttl {
        self.expire.resolve()
    }
}

/// A loader with its value type erased, so loaders of different types can share a registry.
#[derive(Clone)]
pub(crate) struct ErasedLoader(Arc<dyn Any + Send + Sync>);

impl ErasedLoader {
    pub fn new<T: 'static>(loader: Arc<dyn Loader<T>>) -> Self {
        Self(Arc::new(loader))
    }

    /// Recovers the typed loader, or `None` if it produces a different type.
    pub fn downcast<T: 'static>(&self) -> Option<Arc<dyn Loader<T>>> {
        self.0.downcast_ref::<Arc<dyn Loader<T>>>().cloned()
    }
}

impl fmt::Debug for ErasedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErasedLoader")
    }
}

/// Runs a loader, converting errors and panics into a [`CacheError`].
pub(crate) async fn call_loader<T: 'static>(
    loader: Arc<dyn Loader<T>>,
    query: Query,
) -> Result<T, CacheError> {
    // A loader may panic while creating its future, or while it is being polled.
    let future = std::panic::catch_unwind(AssertUnwindSafe(|| loader.load(query)))
        .map_err(CacheError::from_panic)?;

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CacheError::from_loader(err)),
        Err(panic) => Err(CacheError::from_panic(panic)),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Wrapper {
        expire: ExpirePolicy,
    }

    #[test]
    fn test_jitter_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(150);
        let policy = ExpirePolicy::Between(min, max);

        for _ in 0..1000 {
            match policy.resolve() {
                Ttl::After(ttl) => assert!(min <= ttl && ttl < max, "{ttl:?} out of bounds"),
                other => panic!("unexpected ttl {other:?}"),
            }
        }
    }

    #[test]
    fn test_degenerate_policies() {
        let secs = Duration::from_secs;

        assert_eq!(ExpirePolicy::Default.resolve(), Ttl::Default);
        assert_eq!(ExpirePolicy::Never.resolve(), Ttl::Never);
        assert_eq!(ExpirePolicy::After(secs(5)).resolve(), Ttl::After(secs(5)));
        assert_eq!(ExpirePolicy::After(secs(0)).resolve(), Ttl::Default);
        // An empty or inverted range uses its lower bound.
        assert_eq!(
            ExpirePolicy::Between(secs(5), secs(5)).resolve(),
            Ttl::After(secs(5))
        );
        assert_eq!(
            ExpirePolicy::Between(secs(5), secs(1)).resolve(),
            Ttl::After(secs(5))
        );
        assert_eq!(
            ExpirePolicy::Between(secs(0), secs(10)).resolve(),
            Ttl::Default
        );
    }

    #[test]
    fn test_policy_serde() {
        let parse = |yaml: &str| serde_yaml::from_str::<Wrapper>(yaml).unwrap().expire;

        assert_eq!(parse("expire: never"), ExpirePolicy::Never);
        assert_eq!(parse("expire: default"), ExpirePolicy::Default);
        assert_eq!(
            parse("expire: 1m 30s"),
            ExpirePolicy::After(Duration::from_secs(90))
        );
        assert_eq!(
            parse("expire: {min: 30s, max: 1m}"),
            ExpirePolicy::Between(Duration::from_secs(30), Duration::from_secs(60))
        );
        assert!(serde_yaml::from_str::<Wrapper>("expire: soon").is_err());

        let wrapper = Wrapper {
            expire: ExpirePolicy::After(Duration::from_secs(90)),
        };
        let yaml = serde_yaml::to_string(&wrapper).unwrap();
        assert_eq!(yaml, "expire: 1m 30s\n");
    }

    #[tokio::test]
    async fn test_call_loader_converts_failures() {
        let query = Query::new("loader");

        let ok: Arc<dyn Loader<u32>> = Arc::new(loader_fn(|_| async { Ok::<_, anyhow::Error>(1) }));
        assert_eq!(call_loader(ok, query.clone()).await, Ok(1));

        let failing: Arc<dyn Loader<u32>> = Arc::new(loader_fn(|_| async {
            Err::<u32, _>(anyhow::anyhow!("connection refused")).context("fetching user")
        }));
        assert_eq!(
            call_loader(failing, query.clone()).await,
            Err(CacheError::Loader(
                "fetching user: connection refused".into()
            ))
        );

        let panicking: Arc<dyn Loader<u32>> = Arc::new(loader_fn(|_| async {
            if true {
                panic!("loader exploded");
            }
            Ok::<_, anyhow::Error>(0)
        }));
        assert_eq!(
            call_loader(panicking, query).await,
            Err(CacheError::LoaderPanicked("loader exploded".into()))
        );
    }

    #[test]
    fn test_erased_loader_downcast() {
        let loader: Arc<dyn Loader<String>> =
            Arc::new(loader_fn(|_| async { Ok::<_, anyhow::Error>(String::new()) }));
        let erased = ErasedLoader::new(loader);

        assert!(erased.downcast::<String>().is_some());
        assert!(erased.downcast::<u32>().is_none());
    }
}
