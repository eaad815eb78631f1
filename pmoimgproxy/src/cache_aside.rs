//! Lecture des sources à travers le cache (cache-aside)
//!
//! Sur un miss, une seule récupération est lancée par clé : la première
//! requête (le leader) récupère la source et la duplique vers sa réponse et
//! vers le cache ; les requêtes concurrentes sur la même clé attendent la fin
//! de l'écriture puis relisent depuis le cache.
//!
//! ```text
//! get(key) ── hit ──────────────────────────────► FetchResult (cache)
//!     └── miss ─► registre ─ leader ─► backend ─► fan_out ─┬─► réponse
//!                    │                                    └─► set(key)
//!                    └─ follower ─ attend Done/Failed ─► get(key) | backend
//! ```

use crate::backend::{Backend, FetchResult};
use crate::error::{ProxyError, Result};
use crate::resolver::SourceIdentifier;
use pmocache::{CacheStore, fan_out};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot, watch};

/// État d'un remplissage en cours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillState {
    Pending,
    Done,
    Failed,
}

type Registry = Arc<RwLock<HashMap<String, watch::Receiver<FillState>>>>;

/// Récupération des sources, avec ou sans cache
#[derive(Clone)]
pub struct CacheAside {
    backend: Arc<dyn Backend>,
    store: Option<Arc<dyn CacheStore>>,
    capacity: usize,
    in_flight: Registry,
}

enum Role {
    Leader(watch::Sender<FillState>),
    Follower(watch::Receiver<FillState>),
}

impl CacheAside {
    /// `capacity` borne, en chunks, l'avance d'une branche du fan-out sur l'autre
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Option<Arc<dyn CacheStore>>,
        capacity: usize,
    ) -> Self {
        Self {
            backend,
            store,
            capacity,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn fetch(&self, id: &SourceIdentifier) -> Result<FetchResult> {
        let Some(store) = self.store.clone() else {
            return self.backend.fetch(id).await;
        };

        if let Some(hit) = lookup(store.as_ref(), id).await {
            return Ok(hit);
        }

        match self.join(id.as_str()).await {
            Role::Leader(tx) => self.lead(store, id.clone(), tx).await,
            Role::Follower(mut rx) => {
                tracing::debug!("Waiting for in-flight fetch of {}", id);
                let state = rx
                    .wait_for(|s| *s != FillState::Pending)
                    .await
                    .map(|s| *s)
                    .unwrap_or(FillState::Failed);

                if state == FillState::Done {
                    if let Some(hit) = lookup(store.as_ref(), id).await {
                        return Ok(hit);
                    }
                }
                tracing::debug!("In-flight fill of {} unusable, fetching directly", id);
                self.backend.fetch(id).await
            }
        }
    }

    /// Inscrit la clé dans le registre, ou rejoint le remplissage existant
    async fn join(&self, key: &str) -> Role {
        if let Some(rx) = self.in_flight.read().await.get(key) {
            return Role::Follower(rx.clone());
        }

        let mut in_flight = self.in_flight.write().await;
        if let Some(rx) = in_flight.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(FillState::Pending);
        in_flight.insert(key.to_string(), rx);
        Role::Leader(tx)
    }

    /// Récupère la source et remplit le cache dans une tâche détachée
    ///
    /// La tâche survit à l'abandon de la requête du leader : le registre est
    /// toujours nettoyé et les followers toujours notifiés.
    async fn lead(
        &self,
        store: Arc<dyn CacheStore>,
        id: SourceIdentifier,
        state: watch::Sender<FillState>,
    ) -> Result<FetchResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let backend = self.backend.clone();
        let in_flight = self.in_flight.clone();
        let capacity = self.capacity;

        tokio::spawn(async move {
            let key = id.as_str().to_string();

            // Un remplissage a pu se terminer entre le miss et l'inscription
            if let Some(hit) = lookup(store.as_ref(), &id).await {
                let _ = result_tx.send(Ok(hit));
                in_flight.write().await.remove(&key);
                let _ = state.send(FillState::Done);
                return;
            }

            let outcome = match backend.fetch(&id).await {
                Ok(fetched) => {
                    let metadata = fetched.metadata();
                    let size = fetched.size;
                    let tee = fan_out(fetched.stream, capacity);
                    let primary = FetchResult {
                        stream: tee.primary,
                        ..fetched
                    };
                    // Sans destinataire, le fan-out fait échouer l'écriture
                    let _ = result_tx.send(Ok(primary));

                    match store.set(&key, tee.secondary, size, metadata).await {
                        Ok(()) => {
                            tracing::debug!("Cached source {}", key);
                            FillState::Done
                        }
                        Err(e) => {
                            tracing::warn!("Failed to cache source {}: {}", key, e);
                            FillState::Failed
                        }
                    }
                }
                Err(e) => {
                    let _ = result_tx.send(Err(e));
                    FillState::Failed
                }
            };

            in_flight.write().await.remove(&key);
            let _ = state.send(outcome);
        });

        result_rx
            .await
            .map_err(|_| ProxyError::Upstream("source fetch task aborted".to_string()))?
    }
}

/// Lecture dans le cache ; une erreur du cache est traitée comme un miss
async fn lookup(store: &dyn CacheStore, id: &SourceIdentifier) -> Option<FetchResult> {
    match store.get(id.as_str()).await {
        Ok(Some(item)) => {
            tracing::debug!("Cache hit for {}", id);
            Some(FetchResult::from_cached(item))
        }
        Ok(None) => {
            tracing::debug!("Cache miss for {}", id);
            None
        }
        Err(e) => {
            tracing::warn!("Cache lookup failed for {}: {}", id, e);
            None
        }
    }
}
