use bytes::Bytes;
use serde::{Deserialize, Serialize};

use readthru::{Cache, CacheError, Query, RawCodec, Store, Ttl, YamlCodec};

use crate::FaultyStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    tags: Vec<String>,
}

#[tokio::test]
async fn test_yaml_codec() {
    readthru_test::setup();
    let store = FaultyStore::new();
    let cache = Cache::builder()
        .shared_store(store.clone())
        .codec(YamlCodec)
        .build();
    cache.register_loader_fn("profiles", |query: Query| async move {
        Ok::<_, anyhow::Error>(Profile {
            name: query.args_text().into_owned(),
            tags: vec!["new".into()],
        })
    });

    let query = Query::builder("profiles").args("jane").build();
    let profile: Profile = cache.get(&query).await.unwrap();
    assert_eq!(profile.name, "jane");

    let stored = store.get(&query).await.unwrap();
    insta::assert_snapshot!(String::from_utf8_lossy(&stored), @r"
    name: jane
    tags:
    - new
    ");

    // Data that does not decode is reported, and left alone.
    store.set(&query, Bytes::from_static(b"name: [oops"), None).await.unwrap();
    let err = cache.get::<Profile>(&query).await.unwrap_err();
    assert!(matches!(err, CacheError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn test_raw_codec() {
    readthru_test::setup();
    let cache = Cache::builder().codec(RawCodec).build();
    cache.register_loader_fn("blobs", |query: Query| async move {
        Ok::<_, anyhow::Error>(Bytes::copy_from_slice(query.args()))
    });

    let query = Query::builder("blobs").raw_args(&b"\x00\x01\x02"[..]).build();
    let blob: Bytes = cache.get(&query).await.unwrap();
    assert_eq!(&blob[..], b"\x00\x01\x02");

    // The same item can be read as any type the codec supports.
    cache
        .set(&query, &"text".to_owned(), Ttl::Default)
        .await
        .unwrap();
    let text: String = cache.get(&query).await.unwrap();
    assert_eq!(text, "text");
    let bytes: Vec<u8> = cache.get(&query).await.unwrap();
    assert_eq!(bytes, b"text");

    // The registered loader produces `Bytes` only.
    cache.del(&[query.clone()]).await.unwrap();
    assert_eq!(
        cache.get::<String>(&query).await,
        Err(CacheError::LoaderTypeMismatch {
            bucket: "blobs".into()
        })
    );
}

#[tokio::test]
async fn test_config_built_cache() {
    readthru_test::setup();
    let config: readthru::config::Config = readthru::config::Config::from_reader(
        "cache:\n  default_expire: 1m\n  store:\n    type: none\n".as_bytes(),
    )
    .unwrap();
    let cache = Cache::from_config(&config.cache);
    cache.register_loader_fn("profiles", |_| async {
        Ok::<_, anyhow::Error>(Profile::default())
    });

    // Without a store, every read is a miss.
    let query = Query::new("profiles");
    assert_eq!(cache.get::<Profile>(&query).await, Ok(Profile::default()));
    cache.set(&query, &Profile::default(), Ttl::Default).await.unwrap();
    assert_eq!(cache.get::<Profile>(&query).await, Ok(Profile::default()));
}
