use std::sync::Arc;

use readthru::{Cache, CacheBuilder, Query};
use readthru_test as test;

pub use test::{CountingLoader, FAULT_MESSAGE, FaultyStore};

/// Setup tests and create a cache on top of a [`FaultyStore`].
///
/// The `configure` closure can change the builder before the cache is built. The store is
/// returned alongside the cache so tests can inject faults and inspect its counters.
pub fn setup_cache(configure: impl FnOnce(CacheBuilder) -> CacheBuilder) -> (Cache, Arc<FaultyStore>) {
    test::setup();

    let store = FaultyStore::new();
    let builder = Cache::builder().shared_store(store.clone());
    (configure(builder).build(), store)
}

/// A query of the `numbers` bucket.
pub fn number(n: u32) -> Query {
    Query::builder("numbers").args(&n).build()
}
