//! # pmocache - Cache de sources pour PMOImgProxy
//!
//! Cette crate fournit le stockage des sources d'images récupérées par le proxy :
//! les octets originaux (jamais transformés) sont conservés sur disque, indexés
//! par une base SQLite qui garde les métadonnées HTTP et les statistiques d'accès.
//!
//! ## Vue d'ensemble
//!
//! - [`CacheStore`] : le contrat `get`/`set` consommé par le proxy (cache-aside)
//! - [`Cache`] : implémentation disque + SQLite avec éviction LRU
//! - [`fan_out`] : duplication d'un flux d'octets vers deux consommateurs
//!   indépendants avec un tampon borné (réponse HTTP + écriture en cache)
//!
//! ## Architecture
//!
//! ```text
//! pmocache
//!     ├── cache_trait.rs - Contrat CacheStore, types partagés
//!     ├── cache.rs       - Cache disque (blobs + index SQLite)
//!     ├── db.rs          - Base de données SQLite
//!     └── fanout.rs      - Tee borné d'un flux d'octets
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use pmocache::{Cache, CacheStore, EntryMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Cache::new("./cache", 1000)?;
//!
//!     let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"\x89PNG..."))]).boxed();
//!     let metadata = EntryMetadata::new("image/png");
//!     cache.set("/srv/images/cat.png", body, None, metadata).await?;
//!
//!     if let Some(item) = cache.get("/srv/images/cat.png").await? {
//!         println!("{} octets, {}", item.size.unwrap_or(0), item.metadata.mime_type);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Structure des fichiers
//!
//! ```text
//! cache/
//! ├── cache.db                      # Base de données SQLite
//! ├── 1a2b3c4d....orig.blob         # Source 1
//! └── 5e6f7a8b....orig.blob         # Source 2
//! ```
//!
//! ## Schéma de base de données
//!
//! ```sql
//! CREATE TABLE sources (
//!     pk TEXT PRIMARY KEY,           -- Clé unique (hash SHA1 de l'identifiant source)
//!     source TEXT,                   -- Identifiant source (chemin ou URI)
//!     size INTEGER,                  -- Taille du blob en octets
//!     hits INTEGER DEFAULT 0,        -- Nombre d'accès
//!     last_used TEXT,                -- Dernière utilisation (RFC3339)
//!     metadata_json TEXT             -- Métadonnées HTTP (type MIME, validateur, en-têtes)
//! );
//! ```

pub mod cache;
pub mod cache_trait;
pub mod db;
pub mod fanout;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use cache::{new_cache_with_consolidation, Cache};
pub use cache_trait::{pk_from_key, ByteStream, CacheStore, CachedItem, EntryMetadata};
pub use db::{CacheEntry, DB};
pub use fanout::{fan_out, FanOut};

#[cfg(feature = "pmoconfig")]
pub use config_ext::CacheConfigExt;
