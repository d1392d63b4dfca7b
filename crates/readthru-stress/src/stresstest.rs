use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use readthru::Cache;
use readthru::config::CacheConfig;

use crate::workloads::{WorkloadsConfig, prepare_workload, process_workload};

pub async fn perform_stresstest(
    config: CacheConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let cache = Cache::from_config(&config);

    // initialize workloads
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let concurrency = workload.concurrency;
            (concurrency, Arc::new(prepare_workload(&cache, i, workload)))
        })
        .collect();

    // warmup: run each workload once to make sure the loaders are exercised
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(_, workload)| {
            let cache = cache.clone();
            let workload = Arc::clone(workload);
            tokio::spawn(async move { process_workload(&cache, &workload).await })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (concurrency, workload) in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let cache = cache.clone();

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failures = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let cache = cache.clone();
                        let task_durations = Arc::clone(&task_durations);
                        let failures = Arc::clone(&failures);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            if process_workload(&cache, &workload).await.is_err() {
                                failures.fetch_add(1, Ordering::Relaxed);
                            }

                            task_durations.lock().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations: DDSketch = std::mem::take(&mut *task_durations.lock());

            (concurrency, task_durations, failures.load(Ordering::Relaxed))
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations, failures) = task?;

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!(
            "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {failures} failed"
        );
        if ops == 0 {
            continue;
        }

        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    Ok(())
}
