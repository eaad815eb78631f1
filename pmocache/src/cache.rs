//! Module de gestion du cache disque
//!
//! Ce module fournit l'implémentation de [`CacheStore`] utilisée par le proxy :
//! les octets des sources sont stockés dans des blobs, et une base SQLite garde
//! les métadonnées et les statistiques d'accès.

use crate::cache_trait::{pk_from_key, ByteStream, CacheStore, CachedItem, EntryMetadata};
use crate::db::DB;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Nom de la table SQLite des sources
const TABLE_NAME: &str = "sources";

/// Qualifier du blob original
const BLOB_QUALIFIER: &str = "orig";

/// Extension des blobs
const BLOB_EXTENSION: &str = "blob";

/// Extension des fichiers temporaires d'écriture
const PART_EXTENSION: &str = "part";

/// Âge au-delà duquel un fichier `.part` est considéré comme abandonné
const STALE_PART_AGE: Duration = Duration::from_secs(60);

/// Cache disque des sources non transformées
///
/// Les écritures passent par un fichier temporaire unique renommé à la fin :
/// un lecteur ne voit jamais un blob partiel, et deux écritures concurrentes
/// sur la même clé ne se corrompent pas (la dernière gagne).
///
/// Note : Ce type est conçu pour être utilisé derrière un `Arc<Cache>`.
/// La synchronisation est gérée par le Mutex interne de la base de données SQLite.
pub struct Cache {
    /// Répertoire de stockage
    dir: PathBuf,
    /// Limite de taille du cache (nombre d'éléments)
    limit: usize,
    /// Base de données SQLite
    pub db: Arc<DB>,
}

impl Cache {
    /// Crée un nouveau cache
    ///
    /// # Arguments
    ///
    /// * `dir` - Répertoire de stockage du cache (créé si absent)
    /// * `limit` - Limite de taille du cache (nombre d'éléments)
    pub fn new(dir: &str, limit: usize) -> Result<Self> {
        let directory = PathBuf::from(dir);
        std::fs::create_dir_all(&directory)?;
        let db = DB::init(&directory.join("cache.db"), TABLE_NAME)?;

        Ok(Self {
            dir: directory,
            limit,
            db: Arc::new(db),
        })
    }

    /// Retourne le répertoire du cache
    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Construit le chemin du blob d'une clé primaire
    ///
    /// Format: `{pk}.orig.blob`
    pub fn get_file_path(&self, pk: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", pk, BLOB_QUALIFIER, BLOB_EXTENSION))
    }

    fn part_path(&self, pk: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", pk, uuid::Uuid::new_v4(), PART_EXTENSION))
    }

    /// Copie le flux dans `path` et retourne le nombre d'octets écrits
    async fn write_stream(path: &Path, mut stream: ByteStream) -> Result<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Supprime tous les fichiers et entrées du cache
    pub async fn purge(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_file() && !self.is_db_file(&entry.path()) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        self.db
            .purge()
            .map_err(|e| anyhow!("Database error: {}", e))
    }

    /// Consolide le cache
    ///
    /// Supprime les entrées sans blob, les blobs sans entrée, et les fichiers
    /// `.part` abandonnés par une écriture interrompue.
    pub async fn consolidate(&self) -> Result<()> {
        for entry in self.db.get_all()? {
            if !self.get_file_path(&entry.pk).exists() {
                tracing::debug!("Removing cache entry {} without blob", entry.pk);
                self.db.delete(&entry.pk)?;
            }
        }

        let mut dir_entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir_entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() || self.is_db_file(&path) {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if file_name.ends_with(&format!(".{}", PART_EXTENSION)) {
                let age = entry
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| SystemTime::now().duration_since(t).ok())
                    .unwrap_or_default();
                if age >= STALE_PART_AGE {
                    tracing::debug!("Removing stale partial file {}", file_name);
                    tokio::fs::remove_file(&path).await?;
                }
                continue;
            }

            // Format attendu: {pk}.{qualifier}.{ext}
            if let Some(pk) = file_name.split('.').next() {
                if self.db.get(pk)?.is_none() {
                    tracing::debug!("Removing orphan blob {}", file_name);
                    tokio::fs::remove_file(&path).await?;
                }
            }
        }

        Ok(())
    }

    /// Applique la politique d'éviction LRU (Least Recently Used)
    ///
    /// Si le nombre d'entrées dépasse la limite configurée, supprime
    /// les entrées les moins récemment utilisées et leurs blobs.
    ///
    /// # Returns
    ///
    /// Le nombre d'entrées supprimées
    pub async fn enforce_limit(&self) -> Result<usize> {
        let count = self.db.count()?;

        if count <= self.limit {
            return Ok(0);
        }

        let to_remove = count - self.limit;
        let old_entries = self.db.get_oldest(to_remove)?;

        let mut removed = 0;
        for entry in old_entries {
            if let Err(e) = tokio::fs::remove_file(self.get_file_path(&entry.pk)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Error removing blob for {}: {}", entry.pk, e);
                }
            }

            if let Err(e) = self.db.delete(&entry.pk) {
                tracing::warn!("Error deleting entry {} from DB: {}", entry.pk, e);
            } else {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(
                "LRU eviction: removed {} old entries (cache size: {} -> {})",
                removed,
                count,
                count - removed
            );
        }

        Ok(removed)
    }

    fn is_db_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("cache.db"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CacheStore for Cache {
    async fn get(&self, key: &str) -> Result<Option<CachedItem>> {
        let pk = pk_from_key(key);
        let Some(entry) = self.db.get(&pk)? else {
            return Ok(None);
        };

        let file_path = self.get_file_path(&pk);
        let file = match tokio::fs::File::open(&file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Blob missing for cached source {}, dropping entry", key);
                self.db.delete(&pk)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = match entry.metadata_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => EntryMetadata::default(),
        };

        self.db.update_hit(&pk)?;
        tracing::debug!("Cache hit for {} ({} bytes)", key, entry.size);

        Ok(Some(CachedItem {
            stream: ReaderStream::new(file).boxed(),
            size: Some(entry.size as u64),
            metadata,
        }))
    }

    async fn set(
        &self,
        key: &str,
        stream: ByteStream,
        size: Option<u64>,
        metadata: EntryMetadata,
    ) -> Result<()> {
        let pk = pk_from_key(key);
        let part = self.part_path(&pk);

        let written = match Self::write_stream(&part, stream).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e.context(format!("Failed to store {} in cache", key)));
            }
        };

        if let Some(expected) = size {
            if written != expected {
                let _ = tokio::fs::remove_file(&part).await;
                bail!(
                    "Short write for {}: expected {} bytes, got {}",
                    key,
                    expected,
                    written
                );
            }
        }

        if let Err(e) = tokio::fs::rename(&part, self.get_file_path(&pk)).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }

        let metadata_json = serde_json::to_string(&metadata)?;
        self.db.add(&pk, key, written, Some(&metadata_json))?;
        tracing::debug!("Cached {} ({} bytes)", key, written);

        if let Err(e) = self.enforce_limit().await {
            tracing::warn!("Error enforcing cache limit: {}", e);
        }

        Ok(())
    }
}

/// Crée un cache et lance une consolidation en arrière-plan.
///
/// À utiliser au démarrage du service : les écritures interrompues par un
/// arrêt brutal sont nettoyées sans retarder l'acceptation des requêtes.
pub async fn new_cache_with_consolidation(dir: &str, limit: usize) -> Result<Arc<Cache>> {
    let cache = Arc::new(Cache::new(dir, limit)?);
    let cache_clone = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = cache_clone.consolidate().await {
            tracing::warn!("Failed to consolidate image cache on startup: {}", e);
        } else {
            tracing::info!("Image cache consolidated successfully on startup");
        }
    });
    Ok(cache)
}
