use std::time::Duration;

use readthru::{ExpirePolicy, Query, Ttl};

use crate::{CountingLoader, number, setup_cache};

#[tokio::test]
async fn test_loader_ttl() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new("hello".to_owned()).with_expire(Duration::from_millis(100));
    cache.register_loader::<String, _>("test", loader.clone());
    let query = Query::new("test");

    assert_eq!(cache.get::<String>(&query).await.unwrap(), "hello");
    assert_eq!(cache.get::<String>(&query).await.unwrap(), "hello");
    assert_eq!(loader.calls(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(cache.get::<String>(&query).await.unwrap(), "hello");
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_default_expire_range() {
    let (cache, _store) = setup_cache(|builder| {
        builder.default_expire(ExpirePolicy::Between(
            Duration::from_millis(50),
            Duration::from_millis(100),
        ))
    });
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());

    cache.get::<u32>(&number(1)).await.unwrap();
    cache.get::<u32>(&number(1)).await.unwrap();
    assert_eq!(loader.calls(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    cache.get::<u32>(&number(1)).await.unwrap();
    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn test_explicit_ttl_overrides_default() {
    let (cache, _store) = setup_cache(|builder| {
        builder.default_expire(ExpirePolicy::After(Duration::from_millis(50)))
    });
    let loader = CountingLoader::new(1_u32);
    cache.register_loader::<u32, _>("numbers", loader.clone());

    cache.set(&number(1), &10_u32, Ttl::Never).await.unwrap();
    cache.set(&number(2), &20_u32, Ttl::Default).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get::<u32>(&number(1)).await, Ok(10));
    assert_eq!(cache.get::<u32>(&number(2)).await, Ok(1));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_get_with_expire_overrides_loader() {
    let (cache, _store) = setup_cache(|builder| builder);
    let loader = CountingLoader::new(1_u32).with_expire(Duration::from_millis(50));
    cache.register_loader::<u32, _>("numbers", loader.clone());

    let pinned = number(1);
    let short = number(2);
    assert_eq!(cache.get_with_expire::<u32>(&pinned, Ttl::Never).await, Ok(1));
    assert_eq!(cache.get_with_expire::<u32>(&short, Ttl::Default).await, Ok(1));
    assert_eq!(loader.calls(), 2);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get::<u32>(&pinned).await, Ok(1));
    assert_eq!(loader.calls(), 2);
    assert_eq!(cache.get::<u32>(&short).await, Ok(1));
    assert_eq!(loader.calls(), 3);
}
