use std::time::Duration;

use readthru::{CacheError, Query, QueryConfig, loader_fn};

use crate::{CountingLoader, number, setup_cache};

#[tokio::test]
async fn test_duplicates_are_read_once() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(3_u32).with_delay(Duration::from_millis(20));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let queries = [number(1), number(2), number(1), number(3), number(2)];
    let results = cache.mget::<u32>(&queries).await;

    assert_eq!(results, vec![Ok(3); 5]);
    assert_eq!(store.reads(), 3);
    assert_eq!(store.writes(), 3);
    assert_eq!(loader.calls(), 3);
}

#[tokio::test]
async fn test_batch_joins_running_loads() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(3_u32).with_delay(Duration::from_millis(100));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let query = number(1);
    let queries = [number(1), number(2)];
    let (single, batch) = tokio::join!(cache.get::<u32>(&query), cache.mget::<u32>(&queries));

    assert_eq!(single, Ok(3));
    assert_eq!(batch, vec![Ok(3), Ok(3)]);
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_mixed_buckets_and_loaders() {
    let (cache, _store) = setup_cache(|builder| builder);
    cache.register_loader::<u32, _>("numbers", CountingLoader::new(1_u32));

    let custom = Query::builder("numbers")
        .args(&100)
        .loader(loader_fn(|_| async { Ok::<_, anyhow::Error>(100_u32) }))
        .build();
    let queries = [number(1), custom, Query::new("unknown")];
    let results = cache.mget::<u32>(&queries).await;

    assert_eq!(results[0], Ok(1));
    assert_eq!(results[1], Ok(100));
    assert_eq!(
        results[2],
        Err(CacheError::LoaderNotFound {
            bucket: "unknown".into()
        })
    );
    assert_eq!(queries[2].error(), results[2].clone().err());
}

#[tokio::test]
async fn test_mquery() {
    let (cache, _store) = setup_cache(|builder| builder);
    cache.register_loader_fn("squares", |query: Query| async move {
        let n: u32 = query.args_text().parse()?;
        anyhow::ensure!(n < 1000, "{n} is too large");
        Ok::<_, anyhow::Error>(n * n)
    });

    let configs: Vec<_> = [2, 5000, 3]
        .iter()
        .map(|n| QueryConfig::new().args(n))
        .collect();
    let mut squares = Vec::new();
    let err = cache
        .mquery::<u32>("squares", &configs, &mut squares)
        .await
        .unwrap_err();

    assert_eq!(squares, [4, 0, 9]);
    assert_eq!(err.failed(), 1);
    assert_eq!(err.first(), configs[1].error().as_ref());
    insta::assert_snapshot!(format!("{err:#}"), @r"
    1 of 3 queries failed:
      1: loader failed: 5000 is too large
    ");
}

#[tokio::test]
async fn test_mget_slice() {
    let (cache, _store) = setup_cache(|builder| builder);
    cache.register_loader::<u32, _>("numbers", CountingLoader::new(9_u32));

    let mut values = [0_u32; 3];
    cache
        .mget_slice(&[number(1), number(2), number(1)], &mut values)
        .await
        .unwrap();
    assert_eq!(values, [9, 9, 9]);
}
