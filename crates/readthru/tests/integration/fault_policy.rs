use readthru::{CacheError, Ttl};

use crate::{CountingLoader, FAULT_MESSAGE, number, setup_cache};

fn store_fault() -> CacheError {
    CacheError::StoreFault(FAULT_MESSAGE.into())
}

#[tokio::test]
async fn test_read_fault_returns_directly() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());

    store.fail_reads(true);
    assert_eq!(cache.get::<u32>(&number(1)).await, Err(store_fault()));
    assert_eq!(loader.calls(), 0);

    store.fail_reads(false);
    assert_eq!(cache.get::<u32>(&number(1)).await, Ok(1));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_read_fault_falls_back_to_loader() {
    let (cache, store) = setup_cache(|builder| builder.direct_return_on_store_fault(false));
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());
    cache.set(&number(1), &5_u32, Ttl::Never).await.unwrap();

    store.fail_reads(true);
    // The stored value is unreachable, so the loader provides a fresh one.
    assert_eq!(cache.get::<u32>(&number(1)).await, Ok(1));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_write_fault_after_load() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());

    store.fail_writes(true);
    assert_eq!(cache.get::<u32>(&number(1)).await, Err(store_fault()));
    assert_eq!(loader.calls(), 1);

    let (cache, store) = setup_cache(|builder| builder.direct_return_on_store_fault(false));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    store.fail_writes(true);
    assert_eq!(cache.get::<u32>(&number(1)).await, Ok(1));
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_explicit_writes_always_report_faults() {
    let (cache, store) = setup_cache(|builder| builder.direct_return_on_store_fault(false));

    store.fail_writes(true);
    assert_eq!(
        cache.set(&number(1), &1_u32, Ttl::Default).await,
        Err(store_fault())
    );
    assert_eq!(
        cache.save("numbers", &1_u32, Ttl::Default, None).await,
        Err(store_fault())
    );
}

#[tokio::test]
async fn test_batch_read_faults() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());

    store.fail_reads(true);
    let queries = [number(1), number(2), number(1)];
    let results = cache.mget::<u32>(&queries).await;
    assert_eq!(results, vec![Err(store_fault()); 3]);
    assert_eq!(queries[2].error(), Some(store_fault()));
    assert_eq!(loader.calls(), 0);

    let (cache, store) = setup_cache(|builder| builder.direct_return_on_store_fault(false));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    store.fail_reads(true);
    let results = cache.mget::<u32>(&queries).await;
    assert_eq!(results, vec![Ok(1); 3]);
    assert!(queries.iter().all(|query| query.error().is_none()));
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
#[should_panic = "store returned 1 results for 2 queries"]
async fn test_batch_result_count_mismatch() {
    let (cache, store) = setup_cache(|builder| builder);
    cache.register_loader::<u32, _>("numbers", CountingLoader::new(1_u32));

    store.short_batches(true);
    let _ = cache.mget::<u32>(&[number(1), number(2)]).await;
}
