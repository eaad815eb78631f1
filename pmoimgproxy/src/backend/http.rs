use super::{Backend, DEFAULT_MIME_TYPE, FetchResult};
use crate::error::{ProxyError, Result};
use crate::resolver::{SourceIdentifier, SourceKind};
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header};
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::time::Duration;
use url::Url;

/// En-têtes propres à une connexion, jamais relayés
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Backend des sources distantes HTTP(S)
///
/// Décision sur les statuts : 404 et 410 signalent une source absente,
/// tout autre statut hors 2xx est un échec du backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Setup(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub(crate) async fn fetch_url(&self, url: Url) -> Result<FetchResult> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ProxyError::NotFound(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(ProxyError::Upstream(format!("GET {} returned {}", url, status)));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if !HOP_BY_HOP.contains(&name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }

        let mime_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| super::file::mime_from_path(std::path::Path::new(url.path())));
        let mime_type = if mime_type.is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            mime_type
        };

        let validator = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let size = response.content_length();
        tracing::debug!("Opened remote source {} ({:?} bytes, {})", url, size, mime_type);

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::other(e.to_string()))
            .boxed();

        Ok(FetchResult {
            stream,
            mime_type,
            size,
            validator,
            headers,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch(&self, id: &SourceIdentifier) -> Result<FetchResult> {
        match id.kind()? {
            SourceKind::Http(url) => self.fetch_url(url).await,
            SourceKind::File(path) => Err(ProxyError::Setup(format!(
                "HTTP backend cannot fetch {}",
                path.display()
            ))),
        }
    }
}
