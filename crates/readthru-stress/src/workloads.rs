use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

use readthru::{Cache, ExpirePolicy, Query, loader_fn};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The number of distinct items the workload picks from.
    pub keys: u64,
    /// How long the loader of this workload takes.
    #[serde(default, with = "humantime_serde")]
    pub load_latency: Duration,
    /// How long loaded items stay in the store.
    #[serde(default)]
    pub expire: ExpirePolicy,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    /// Single reads of random items.
    Get,
    /// Batch reads of random items, which may contain duplicates.
    Mget { batch: usize },
}

pub struct ParsedWorkload {
    bucket: String,
    keys: u64,
    payload: Payload,
}

/// Registers the loader of a workload with the cache.
pub fn prepare_workload(cache: &Cache, index: usize, workload: Workload) -> ParsedWorkload {
    let bucket = format!("workload-{index}");
    let latency = workload.load_latency;

    let loader = loader_fn(move |query: Query| async move {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok::<_, anyhow::Error>(format!("value of {query}"))
    })
    .with_expire(workload.expire);
    cache.register_loader::<String, _>(bucket.clone(), loader);

    ParsedWorkload {
        bucket,
        keys: workload.keys.max(1),
        payload: workload.payload,
    }
}

fn random_query(workload: &ParsedWorkload) -> Query {
    let key = rand::rng().random_range(0..workload.keys);
    Query::builder(workload.bucket.as_str()).args(&key).build()
}

pub async fn process_workload(cache: &Cache, workload: &ParsedWorkload) -> Result<()> {
    match workload.payload {
        Payload::Get => {
            let query = random_query(workload);
            cache.get::<String>(&query).await?;
        }
        Payload::Mget { batch } => {
            let queries: Vec<_> = (0..batch).map(|_| random_query(workload)).collect();
            let mut values = Vec::with_capacity(batch);
            cache.mget_into::<String>(&queries, &mut values).await?;
        }
    }
    Ok(())
}
