use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use pmocache::{fan_out, ByteStream};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn chunks(n: usize) -> ByteStream {
    stream::iter((0..n).map(|i| Ok(Bytes::from(vec![i as u8; 4])))).boxed()
}

#[tokio::test]
async fn test_both_sides_receive_identical_bytes() {
    let tee = fan_out(chunks(50), 4);

    let (primary, secondary) = tokio::join!(
        tee.primary.try_collect::<Vec<Bytes>>(),
        tee.secondary.try_collect::<Vec<Bytes>>(),
    );

    let primary = primary.unwrap().concat();
    let secondary = secondary.unwrap().concat();
    assert_eq!(primary.len(), 200);
    assert_eq!(primary, secondary);
}

#[tokio::test]
async fn test_dropping_primary_aborts_secondary() {
    let tee = fan_out(chunks(1000), 2);
    let mut primary = tee.primary;

    let first = primary.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 4);
    drop(primary);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tee.secondary.try_collect::<Vec<Bytes>>(),
    )
    .await
    .expect("secondary must terminate");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_dropping_secondary_keeps_primary_intact() {
    let tee = fan_out(chunks(100), 2);
    drop(tee.secondary);

    let data = tee.primary.try_collect::<Vec<Bytes>>().await.unwrap();
    assert_eq!(data.concat().len(), 400);
}

#[tokio::test]
async fn test_source_error_reaches_both_sides() {
    let source: ByteStream = stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
    ])
    .boxed();
    let tee = fan_out(source, 4);

    let (primary, secondary) = tokio::join!(
        tee.primary.try_collect::<Vec<Bytes>>(),
        tee.secondary.try_collect::<Vec<Bytes>>(),
    );

    assert_eq!(primary.unwrap_err().kind(), io::ErrorKind::NotFound);
    assert_eq!(secondary.unwrap_err().kind(), io::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_stalled_consumer_bounds_source_reads() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let source: ByteStream = stream::iter(0..1000usize)
        .map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"x"))
        })
        .boxed();

    let capacity = 3;
    let tee = fan_out(source, capacity);

    // Aucun des deux côtés ne lit : la pompe doit se bloquer rapidement
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = pulled.load(Ordering::SeqCst);
    assert!(seen <= 2 * capacity + 2, "pulled {} chunks", seen);

    drop(tee);
}
