use std::time::Duration;

use readthru::{CacheError, Ttl};
use tokio_util::sync::CancellationToken;

use crate::{CountingLoader, number, setup_cache};

#[tokio::test]
async fn test_cancelled_get_keeps_loading() {
    let (cache, store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32).with_delay(Duration::from_millis(200));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let cancel = CancellationToken::new();
    let query = number(1);
    let (result, ()) = tokio::join!(cache.get_with_cancel::<u32>(&query, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    assert_eq!(result, Err(CacheError::Cancelled));

    // The load finishes in the background and populates the store.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.writes(), 1);
    assert_eq!(cache.get::<u32>(&query).await, Ok(1));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_get_with_timeout() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32).with_delay(Duration::from_millis(200));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let result = cache
        .get_with_timeout::<u32>(&number(1), Duration::from_millis(20))
        .await;
    assert_eq!(result, Err(CacheError::Cancelled));

    let result = cache
        .get_with_timeout::<u32>(&number(2), Duration::from_secs(5))
        .await;
    assert_eq!(result, Ok(1));
}

#[tokio::test]
async fn test_already_cancelled() {
    let (cache, store) = setup_cache(|builder| builder);
    cache.register_loader::<u32, _>("numbers", CountingLoader::new(1_u32));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let query = number(1);
    assert_eq!(
        cache.get_with_cancel::<u32>(&query, &cancel).await,
        Err(CacheError::Cancelled)
    );
    assert_eq!(
        cache
            .set_with_cancel(&query, &1_u32, Ttl::Default, &cancel)
            .await,
        Err(CacheError::Cancelled)
    );
    assert_eq!(
        cache.del_with_cancel(&[query.clone()], &cancel).await,
        Err(CacheError::Cancelled)
    );
    assert_eq!(
        cache
            .del_bucket_with_cancel(&["numbers".to_owned()], &cancel)
            .await,
        Err(CacheError::Cancelled)
    );
    assert!(matches!(
        cache.mget_with_cancel::<u32>(&[query], &cancel).await,
        Err(CacheError::Cancelled)
    ));

    // Writes that were already handed to the store are not rolled back.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.writes() <= 1);
}

#[tokio::test]
async fn test_uncancelled_operations() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());
    let cancel = CancellationToken::new();

    let query = number(1);
    cache
        .set_with_cancel(&query, &5_u32, Ttl::Never, &cancel)
        .await
        .unwrap();
    let results = cache
        .mget_with_cancel::<u32>(&[query.clone(), number(2)], &cancel)
        .await
        .unwrap();
    assert_eq!(results, vec![Ok(5), Ok(1)]);

    cache
        .del_with_cancel(&[query.clone()], &cancel)
        .await
        .unwrap();
    assert_eq!(cache.get_with_cancel::<u32>(&query, &cancel).await, Ok(1));

    cache
        .del_bucket_with_cancel(&["numbers".to_owned()], &cancel)
        .await
        .unwrap();
    assert_eq!(loader.calls(), 2);
}
