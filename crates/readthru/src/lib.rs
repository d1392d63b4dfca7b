//! A read-through cache that coalesces concurrent misses into a single load.
//!
//! Items are identified by a [`Query`], made of a bucket name and canonicalized arguments. Each
//! bucket has a [`Loader`] that produces values on a miss. Values are encoded with a [`Codec`]
//! and kept in a [`Store`], which the [`Cache`] reads through.
//!
//! ```no_run
//! # async fn example() -> readthru::CacheEntry {
//! use readthru::{Cache, Query};
//!
//! let cache = Cache::builder().build();
//! cache.register_loader_fn("greetings", |query: Query| async move {
//!     Ok::<_, anyhow::Error>(format!("hello {}", query.args_text()))
//! });
//!
//! let query = Query::builder("greetings").args("world").build();
//! let greeting: String = cache.get(&query).await?;
//! assert_eq!(greeting, "hello world");
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod query;
pub mod single_flight;
pub mod store;
mod utils;

pub use cache::{Cache, CacheBuilder};
pub use codec::{Codec, JsonCodec, RawCodec, YamlCodec};
pub use error::{BatchError, CacheEntry, CacheError};
pub use loader::{ExpirePolicy, FnLoader, Loader, Ttl, loader_fn};
pub use query::{Query, QueryBuilder, QueryConfig};
pub use single_flight::{NoSingleFlight, ShardedSingleFlight, SingleFlight};
pub use store::{MemoryStore, NoStore, Store, StoreError};
