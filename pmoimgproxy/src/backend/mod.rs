//! Backends de récupération des sources
//!
//! Un backend ouvre une source et retourne un flux lisible une seule fois
//! accompagné de ses métadonnées. Deux implémentations sont fournies :
//! [`FileBackend`] et [`HttpBackend`] ; [`DefaultBackend`] choisit entre les
//! deux selon la nature de l'identifiant.

mod file;
mod http;

pub use file::FileBackend;
pub use http::HttpBackend;

use crate::error::Result;
use crate::resolver::{SourceIdentifier, SourceKind};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use pmocache::{ByteStream, CachedItem, EntryMetadata};
use std::fmt;
use std::time::Duration;

/// Type MIME utilisé quand rien ne permet de le déterminer
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Source ouverte, prête à être lue
pub struct FetchResult {
    pub stream: ByteStream,
    pub mime_type: String,
    pub size: Option<u64>,
    /// Validateur (ETag) de la source, s'il existe
    pub validator: Option<String>,
    /// En-têtes de la source, relayés en passthrough
    pub headers: HeaderMap,
}

impl fmt::Debug for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResult")
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("validator", &self.validator)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl FetchResult {
    /// Métadonnées conservées avec la source dans le cache
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            mime_type: self.mime_type.clone(),
            validator: self.validator.clone(),
            headers: self
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
        }
    }

    /// Reconstruit une source depuis une entrée du cache
    pub fn from_cached(item: CachedItem) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &item.metadata.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        let mime_type = if item.metadata.mime_type.is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            item.metadata.mime_type
        };

        Self {
            stream: item.stream,
            mime_type,
            size: item.size,
            validator: item.metadata.validator,
            headers,
        }
    }
}

/// Contrat d'un backend
///
/// Les erreurs sont déjà classées : [`ProxyError::NotFound`](crate::ProxyError::NotFound)
/// pour une source absente, [`ProxyError::Upstream`](crate::ProxyError::Upstream)
/// pour tout autre échec.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch(&self, id: &SourceIdentifier) -> Result<FetchResult>;
}

/// Backend par défaut : fichiers locaux et URI HTTP(S)
#[derive(Debug, Clone)]
pub struct DefaultBackend {
    file: FileBackend,
    http: HttpBackend,
}

impl DefaultBackend {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            file: FileBackend,
            http: HttpBackend::new(http_timeout)?,
        })
    }
}

#[async_trait]
impl Backend for DefaultBackend {
    async fn fetch(&self, id: &SourceIdentifier) -> Result<FetchResult> {
        match id.kind()? {
            SourceKind::File(path) => self.file.fetch_path(&path).await,
            SourceKind::Http(url) => self.http.fetch_url(url).await,
        }
    }
}
