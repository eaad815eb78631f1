use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use pmocache::{pk_from_key, ByteStream, Cache, CacheStore, EntryMetadata};
use std::io;
use tempfile::TempDir;

fn create_test_cache(limit: usize) -> (TempDir, Cache) {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(temp_dir.path().to_str().unwrap(), limit).unwrap();
    (temp_dir, cache)
}

fn body(chunks: &[&'static [u8]]) -> ByteStream {
    stream::iter(
        chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c)))
            .collect::<Vec<_>>(),
    )
    .boxed()
}

async fn collect(stream: ByteStream) -> Vec<u8> {
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn test_cache_creation() {
    let (temp_dir, cache) = create_test_cache(10);
    assert_eq!(cache.cache_dir(), temp_dir.path());
    assert!(temp_dir.path().join("cache.db").exists());
}

#[tokio::test]
async fn test_get_missing_key_is_a_miss() {
    let (_temp_dir, cache) = create_test_cache(10);
    assert!(cache.get("/nothing/here.png").await.unwrap().is_none());
}

#[tokio::test]
async fn test_set_then_get_returns_bytes_and_metadata() {
    let (_temp_dir, cache) = create_test_cache(10);

    let metadata = EntryMetadata {
        mime_type: "image/png".to_string(),
        validator: Some("\"abc\"".to_string()),
        headers: vec![("x-origin".to_string(), "upstream".to_string())],
    };

    cache
        .set("/a/cat.png", body(&[b"hello ", b"world"]), Some(11), metadata.clone())
        .await
        .unwrap();

    let item = cache.get("/a/cat.png").await.unwrap().expect("cached item");
    assert_eq!(item.size, Some(11));
    assert_eq!(item.metadata, metadata);
    assert_eq!(collect(item.stream).await, b"hello world");

    let entry = cache.db.get(&pk_from_key("/a/cat.png")).unwrap().unwrap();
    assert_eq!(entry.source, "/a/cat.png");
    assert_eq!(entry.hits, 1);
}

#[tokio::test]
async fn test_failed_stream_stores_nothing() {
    let (temp_dir, cache) = create_test_cache(10);

    let failing: ByteStream = stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
    ])
    .boxed();

    let result = cache
        .set("/a/broken.png", failing, None, EntryMetadata::new("image/png"))
        .await;
    assert!(result.is_err());
    assert!(cache.get("/a/broken.png").await.unwrap().is_none());

    // Ni blob ni fichier temporaire ne doivent subsister
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with("cache.db"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_short_write_is_rejected() {
    let (_temp_dir, cache) = create_test_cache(10);

    let result = cache
        .set("/a/short.png", body(&[b"abc"]), Some(10), EntryMetadata::new("image/png"))
        .await;
    assert!(result.is_err());
    assert!(cache.get("/a/short.png").await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_key_written_twice_keeps_one_complete_entry() {
    let (_temp_dir, cache) = create_test_cache(10);

    let (a, b) = tokio::join!(
        cache.set("/a/dup.png", body(&[b"first"]), None, EntryMetadata::new("image/png")),
        cache.set("/a/dup.png", body(&[b"second"]), None, EntryMetadata::new("image/png")),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(cache.db.count().unwrap(), 1);
    let item = cache.get("/a/dup.png").await.unwrap().unwrap();
    let data = collect(item.stream).await;
    assert!(data == b"first" || data == b"second");
}

#[tokio::test]
async fn test_missing_blob_is_treated_as_miss() {
    let (_temp_dir, cache) = create_test_cache(10);

    cache
        .set("/a/gone.png", body(&[b"data"]), None, EntryMetadata::new("image/png"))
        .await
        .unwrap();

    let pk = pk_from_key("/a/gone.png");
    std::fs::remove_file(cache.get_file_path(&pk)).unwrap();

    assert!(cache.get("/a/gone.png").await.unwrap().is_none());
    assert!(cache.db.get(&pk).unwrap().is_none());
}

#[tokio::test]
async fn test_lru_eviction() {
    let (_temp_dir, cache) = create_test_cache(2);

    for key in ["/a/1.png", "/a/2.png"] {
        cache
            .set(key, body(&[b"x"]), None, EntryMetadata::new("image/png"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // Rafraîchit la première entrée
    let item = cache.get("/a/1.png").await.unwrap().unwrap();
    drop(item);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    cache
        .set("/a/3.png", body(&[b"x"]), None, EntryMetadata::new("image/png"))
        .await
        .unwrap();

    assert_eq!(cache.db.count().unwrap(), 2);
    assert!(cache.get("/a/1.png").await.unwrap().is_some());
    assert!(cache.get("/a/2.png").await.unwrap().is_none());
    assert!(cache.get("/a/3.png").await.unwrap().is_some());
}

#[tokio::test]
async fn test_consolidate_removes_orphans() {
    let (temp_dir, cache) = create_test_cache(10);

    cache
        .set("/a/kept.png", body(&[b"data"]), None, EntryMetadata::new("image/png"))
        .await
        .unwrap();
    cache
        .set("/a/lost.png", body(&[b"data"]), None, EntryMetadata::new("image/png"))
        .await
        .unwrap();

    std::fs::remove_file(cache.get_file_path(&pk_from_key("/a/lost.png"))).unwrap();
    let orphan = temp_dir.path().join(format!("{}.orig.blob", pk_from_key("/a/orphan.png")));
    std::fs::write(&orphan, b"orphan").unwrap();

    cache.consolidate().await.unwrap();

    assert!(!orphan.exists());
    assert_eq!(cache.db.count().unwrap(), 1);
    assert!(cache.get("/a/kept.png").await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge() {
    let (_temp_dir, cache) = create_test_cache(10);

    cache
        .set("/a/cat.png", body(&[b"data"]), None, EntryMetadata::new("image/png"))
        .await
        .unwrap();
    cache.purge().await.unwrap();

    assert_eq!(cache.db.count().unwrap(), 0);
    assert!(cache.get("/a/cat.png").await.unwrap().is_none());
}
