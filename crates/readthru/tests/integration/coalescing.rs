use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use readthru::{CacheError, NoSingleFlight, Query, ShardedSingleFlight};

use crate::{CountingLoader, number, setup_cache};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_load_once() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new("value".to_owned()).with_delay(Duration::from_millis(100));
    cache.register_loader::<String, _>("numbers", loader.clone());

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get::<String>(&number(1)).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "value");
    }
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.writes(), 1);

    // A different identity loads on its own.
    assert_eq!(cache.get::<String>(&number(2)).await.unwrap(), "value");
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_errors_are_shared_but_not_cached() {
    let (cache, store) = setup_cache(|builder| builder.single_flight(ShardedSingleFlight::new(1)));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        cache.register_loader_fn("numbers", move |_: Query| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<u32, _>(anyhow::anyhow!("backend is down"))
            }
        });
    }

    let query = number(1);
    let results = futures::future::join_all((0..10).map(|_| cache.get::<u32>(&query))).await;
    for result in results {
        assert_eq!(
            result,
            Err(CacheError::Loader("backend is down".into()))
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.writes(), 0);

    // The failure is forgotten as soon as the load finished.
    assert!(cache.get::<u32>(&query).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_without_single_flight() {
    let (cache, _store) = setup_cache(|builder| builder.single_flight(NoSingleFlight));
    let loader = CountingLoader::new(7_u32).with_delay(Duration::from_millis(50));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let query = number(1);
    let results = futures::future::join_all((0..5).map(|_| cache.get::<u32>(&query))).await;
    assert!(results.iter().all(|result| *result == Ok(7)));
    assert_eq!(loader.calls(), 5);
}

#[tokio::test]
async fn test_panicking_loader() {
    let (cache, _store) = setup_cache(|builder| builder);
    cache.register_loader_fn("numbers", |query: Query| async move {
        if query.args_text() == "13" {
            panic!("unlucky number");
        }
        Ok::<_, anyhow::Error>(1_u32)
    });

    let err = cache.get::<u32>(&number(13)).await.unwrap_err();
    assert!(matches!(&err, CacheError::LoaderPanicked(msg) if msg.contains("unlucky")), "{err:?}");

    // The cache keeps working.
    assert_eq!(cache.get::<u32>(&number(1)).await, Ok(1));
}
