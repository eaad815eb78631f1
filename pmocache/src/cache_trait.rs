use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Flux d'octets lisible une seule fois, partagé par le cache et le proxy.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Métadonnées conservées avec une source en cache
///
/// Ce sont les informations nécessaires pour resservir la source en
/// passthrough sans recontacter le backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Type MIME de la source
    pub mime_type: String,
    /// Validateur du backend (ETag), s'il existe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    /// En-têtes de réponse du backend, dans l'ordre reçu
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl EntryMetadata {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }
}

/// Source servie depuis le cache
pub struct CachedItem {
    pub stream: ByteStream,
    pub size: Option<u64>,
    pub metadata: EntryMetadata,
}

impl fmt::Debug for CachedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedItem")
            .field("size", &self.size)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Contrat cache-aside consommé par le proxy
///
/// La clé est toujours l'identifiant de la source non transformée.
/// Les implémentations doivent supporter des accès concurrents sur des clés
/// distinctes et tolérer des écritures concurrentes sur une même clé.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Retourne la source en cache, ou `None` si la clé est absente
    async fn get(&self, key: &str) -> Result<Option<CachedItem>>;

    /// Consomme `stream` et l'enregistre sous `key`
    ///
    /// Si le flux se termine par une erreur, ou s'il est plus court que
    /// `size`, rien n'est enregistré et une erreur est retournée.
    async fn set(
        &self,
        key: &str,
        stream: ByteStream,
        size: Option<u64>,
        metadata: EntryMetadata,
    ) -> Result<()>;
}

/// Génère une clé primaire à partir d'un identifiant de source
///
/// Utilise SHA1 et retourne le condensat en hexadécimal (40 caractères).
///
/// # Exemple
///
/// ```
/// use pmocache::pk_from_key;
///
/// let pk = pk_from_key("https://example.com/cat.png");
/// assert_eq!(pk.len(), 40);
/// ```
pub fn pk_from_key(key: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
