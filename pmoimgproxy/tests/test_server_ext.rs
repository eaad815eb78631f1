#![cfg(feature = "pmoserver")]

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use pmocache::{Cache, CacheStore};
use pmoimgproxy::{HeaderOverride, ImageProxyExt, ProxyOptions};
use pmoserver::ServerBuilder;
use std::sync::Arc;
use tower::ServiceExt;

#[tokio::test]
async fn test_proxy_is_mounted_on_server() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("note.gif"), b"GIF89a fake").unwrap();

    let mut server = ServerBuilder::new("test", "localhost", 0).build();
    let options = ProxyOptions::new(root.path().to_str().unwrap()).with_header(
        header::CACHE_CONTROL,
        HeaderOverride::Set("no-store".parse().unwrap()),
    );
    let proxy = server
        .init_image_proxy("/media/", options, None)
        .await
        .unwrap();
    assert_eq!(proxy.options().root, root.path().to_str().unwrap());

    let router = server.router().await;
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/media/note.gif")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"GIF89a fake");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/elsewhere/note.gif")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mount_with_cache_populates_store() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.png"), b"not decoded on passthrough").unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(Cache::new(cache_dir.path().to_str().unwrap(), 10).unwrap());

    let mut server = ServerBuilder::new("test", "localhost", 0).build();
    server
        .init_image_proxy(
            "/images",
            ProxyOptions::new(root.path().to_str().unwrap()),
            Some(cache.clone()),
        )
        .await
        .unwrap();

    let response = server
        .router()
        .await
        .oneshot(Request::builder().uri("/images/a.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let key = root.path().join("a.png");
    let mut cached = None;
    for _ in 0..200 {
        cached = cache.get(key.to_str().unwrap()).await.unwrap();
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let cached = cached.expect("source should be cached");
    assert_eq!(cached.metadata.mime_type, "image/png");
    assert_eq!(cached.size, Some(26));
}
