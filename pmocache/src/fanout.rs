//! Duplication d'un flux d'octets vers deux consommateurs
//!
//! Un flux source est lu par une tâche de pompage qui pousse chaque chunk
//! dans deux canaux bornés. Le consommateur principal (la réponse HTTP) et
//! le consommateur secondaire (l'écriture en cache) avancent chacun à leur
//! rythme, dans la limite de `capacity` chunks d'avance.
//!
//! ```text
//! source ──► pump ──┬──► primary   (client HTTP)
//!                   └──► secondary (CacheStore::set)
//! ```
//!
//! - Si le consommateur principal abandonne, le secondaire reçoit une erreur :
//!   un cache ne doit jamais enregistrer une source incomplète.
//! - Si le consommateur secondaire abandonne, le principal continue seul.
//! - Une erreur de la source est transmise aux deux consommateurs.

use crate::cache_trait::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Les deux moitiés d'un flux dupliqué
pub struct FanOut {
    pub primary: ByteStream,
    pub secondary: ByteStream,
}

/// Duplique `source` en deux flux indépendants
///
/// # Arguments
///
/// * `source` - Flux à dupliquer, consommé par une tâche tokio
/// * `capacity` - Nombre de chunks tamponnés par consommateur (minimum 1)
///
/// # Exemple
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use futures::StreamExt;
/// use pmocache::fan_out;
///
/// # async fn demo() {
/// let source = futures::stream::iter(vec![Ok(Bytes::from_static(b"abc"))]).boxed();
/// let tee = fan_out(source, 16);
/// let _to_client = tee.primary;
/// let _to_cache = tee.secondary;
/// # }
/// ```
pub fn fan_out(source: ByteStream, capacity: usize) -> FanOut {
    let capacity = capacity.max(1);
    let (primary_tx, primary_rx) = mpsc::channel(capacity);
    let (secondary_tx, secondary_rx) = mpsc::channel(capacity);

    tokio::spawn(pump(source, primary_tx, secondary_tx));

    FanOut {
        primary: ReceiverStream::new(primary_rx).boxed(),
        secondary: ReceiverStream::new(secondary_rx).boxed(),
    }
}

async fn pump(
    mut source: ByteStream,
    primary_tx: mpsc::Sender<io::Result<Bytes>>,
    secondary_tx: mpsc::Sender<io::Result<Bytes>>,
) {
    let mut secondary = Some(secondary_tx);

    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => {
                if primary_tx.send(Ok(chunk.clone())).await.is_err() {
                    abort_secondary(secondary.take()).await;
                    return;
                }

                let Some(tx) = secondary.as_ref() else {
                    continue;
                };

                // Un secondaire lent ne doit pas masquer l'abandon du principal
                let delivered = tokio::select! {
                    res = tx.send(Ok(chunk)) => res.is_ok(),
                    _ = primary_tx.closed() => {
                        abort_secondary(secondary.take()).await;
                        return;
                    }
                };

                if !delivered {
                    tracing::debug!("Fan-out secondary consumer dropped, continuing with primary");
                    secondary = None;
                }
            }
            Err(e) => {
                tracing::debug!("Fan-out source failed: {}", e);
                if let Some(tx) = secondary.take() {
                    let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                }
                let _ = primary_tx.send(Err(e)).await;
                return;
            }
        }
    }
}

async fn abort_secondary(secondary: Option<mpsc::Sender<io::Result<Bytes>>>) {
    if let Some(tx) = secondary {
        tracing::debug!("Fan-out primary consumer dropped, aborting secondary");
        let _ = tx
            .send(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "primary consumer dropped",
            )))
            .await;
    }
}
