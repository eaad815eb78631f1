use super::{Backend, DEFAULT_MIME_TYPE, FetchResult};
use crate::error::{ProxyError, Result};
use crate::resolver::{SourceIdentifier, SourceKind};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use futures::StreamExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::io::ReaderStream;

/// Backend des fichiers locaux
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBackend;

impl FileBackend {
    pub(crate) async fn fetch_path(&self, path: &Path) -> Result<FetchResult> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ProxyError::from_io(&path.display().to_string(), &e))?;

        if !meta.is_file() {
            return Err(ProxyError::NotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ProxyError::from_io(&path.display().to_string(), &e))?;

        let size = meta.len();
        let mime_type = mime_from_path(path);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok());

        // Validateur faible : taille et date de modification
        let validator = mtime.map(|d| format!("W/\"{:x}-{:x}\"", size, d.as_millis()));
        if let Some(v) = validator.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::ETAG, v);
        }
        if let Ok(modified) = meta.modified() {
            if let Ok(v) = HeaderValue::from_str(&http_date(modified)) {
                headers.insert(header::LAST_MODIFIED, v);
            }
        }

        tracing::debug!("Opened local source {} ({} bytes, {})", path.display(), size, mime_type);

        Ok(FetchResult {
            stream: ReaderStream::new(file).boxed(),
            mime_type,
            size: Some(size),
            validator,
            headers,
        })
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn fetch(&self, id: &SourceIdentifier) -> Result<FetchResult> {
        match id.kind()? {
            SourceKind::File(path) => self.fetch_path(&path).await,
            SourceKind::Http(url) => Err(ProxyError::Setup(format!(
                "file backend cannot fetch {}",
                url
            ))),
        }
    }
}

/// Déduit le type MIME de l'extension du fichier
pub(crate) fn mime_from_path(path: &Path) -> String {
    path.extension()
        .and_then(image::ImageFormat::from_extension)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

/// Formate une date au format HTTP (RFC 7231, IMF-fixdate)
fn http_date(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|d| d.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default()
}
