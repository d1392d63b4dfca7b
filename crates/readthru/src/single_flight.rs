//! Coalescing of concurrent loads.
//!
//! When many tasks miss the same item at the same time, only the first one should run the
//! loader. Everyone else waits for that result instead of hammering the loader backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::query::Query;
use crate::utils::defer;

/// The shared outcome of one load: the encoded value, or the reason it failed.
pub type LoadResult = Result<Bytes, CacheError>;

/// The work to run on behalf of every caller of one identity.
pub type Computation = BoxFuture<'static, LoadResult>;

/// The default number of shards of a [`ShardedSingleFlight`].
pub const DEFAULT_SHARDS: usize = 32;

type ComputationChannel = Shared<oneshot::Receiver<LoadResult>>;
type Shard = Mutex<HashMap<u64, ComputationChannel>>;

/// Runs computations such that there is at most one in flight per identity.
pub trait SingleFlight: Send + Sync + fmt::Debug + 'static {
    /// Runs `computation` for `query`, or joins the computation that is already running for
    /// the same [`global_id`](Query::global_id).
    ///
    /// The `computation` is dropped without being polled if another one is already in flight.
    fn run(&self, query: &Query, computation: Computation) -> BoxFuture<'static, LoadResult>;
}

/// The default [`SingleFlight`], which keeps in-flight computations in a sharded map.
///
/// Each computation is spawned on the current tokio runtime as a separate task. It runs to
/// completion even if every caller stops waiting for it, so a cancelled request still leaves
/// its result in the store.
pub struct ShardedSingleFlight {
    shards: Arc<[Shard]>,
}

impl ShardedSingleFlight {
    /// Creates a registry with the given number of shards.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is not a power of two.
    pub fn new(shards: usize) -> Self {
        assert!(
            shards.is_power_of_two(),
            "number of single flight shards must be a power of two, got {shards}"
        );

        Self {
            shards: (0..shards).map(|_| Shard::default()).collect(),
        }
    }

    fn shard_index(&self, global_id: u64) -> usize {
        (global_id & (self.shards.len() as u64 - 1)) as usize
    }

    /// The number of computations that are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    fn create_channel(
        &self,
        index: usize,
        global_id: u64,
        computation: Computation,
    ) -> ComputationChannel {
        let (sender, receiver) = oneshot::channel();

        let shards = Arc::clone(&self.shards);
        let remove_computation_token = defer(move || {
            shards[index].lock().remove(&global_id);
        });

        let channel = async move {
            let result = computation.await;
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_computation_token);
            sender.send(result).ok();
        };

        tokio::spawn(channel);

        receiver.shared()
    }
}

impl Default for ShardedSingleFlight {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl fmt::Debug for ShardedSingleFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedSingleFlight")
            .field("shards", &self.shards.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl SingleFlight for ShardedSingleFlight {
    fn run(&self, query: &Query, computation: Computation) -> BoxFuture<'static, LoadResult> {
        let global_id = query.global_id();
        let index = self.shard_index(global_id);

        let channel = {
            let mut shard = self.shards[index].lock();
            if let Some(channel) = shard.get(&global_id) {
                // A concurrent load was deduplicated.
                metric!(counter("single_flight.channel.hit") += 1, "bucket" => query.bucket());
                channel.clone()
            } else {
                metric!(counter("single_flight.channel.miss") += 1, "bucket" => query.bucket());
                let channel = self.create_channel(index, global_id, computation);
                let evicted = shard.insert(global_id, channel.clone());
                debug_assert!(evicted.is_none());
                channel
            }
        };

        let future = channel.unwrap_or_else(move |_cancelled| {
            // The leader is gone without sending, which means its task was aborted or panicked.
            Err(CacheError::InternalError)
        });

        Box::pin(future)
    }
}

/// A [`SingleFlight`] that does not coalesce anything and runs every computation inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSingleFlight;

impl SingleFlight for NoSingleFlight {
    fn run(&self, _query: &Query, computation: Computation) -> BoxFuture<'static, LoadResult> {
        computation
    }
}
