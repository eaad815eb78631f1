//! Résolution d'un chemin de requête en identifiant de source

use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use percent_encoding::percent_decode_str;
use url::Url;

/// Identifiant opaque d'une source : chemin local absolu ou URI absolue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentifier(String);

/// Nature d'un identifiant, utilisée pour choisir le backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    File(PathBuf),
    Http(Url),
}

impl SourceIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Distingue les URI HTTP(S), les URI `file://` et les chemins locaux
    pub fn kind(&self) -> Result<SourceKind> {
        match Url::parse(&self.0) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(SourceKind::Http(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(SourceKind::File)
                .map_err(|_| ProxyError::Setup(format!("invalid file URI: {}", self.0))),
            Ok(url) if url.scheme().len() > 1 => Err(ProxyError::Setup(format!(
                "unsupported source scheme: {}",
                url.scheme()
            ))),
            // Absence de schéma, ou lettre de lecteur Windows
            _ => Ok(SourceKind::File(PathBuf::from(&self.0))),
        }
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contexte de la requête transmis au resolver
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Chemin relatif au point de montage du proxy, encore encodé
    pub path: String,
    /// Query string brute
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Contrat de résolution d'une requête
///
/// Toute erreur retournée ici est classée en [`ProxyError::Setup`].
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, root: &str, ctx: &RequestContext) -> Result<SourceIdentifier>;
}

/// Resolver par défaut
///
/// - `root` est une URI : jointure d'URL avec le chemin de la requête
/// - sinon : jointure de chemins locaux, le chemin de la requête étant
///   décodé et ne pouvant pas remonter au-dessus de `root`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResolver;

#[async_trait]
impl Resolver for DefaultResolver {
    async fn resolve(&self, root: &str, ctx: &RequestContext) -> Result<SourceIdentifier> {
        if is_uri(root) {
            join_uri(root, &ctx.path)
        } else {
            join_local(root, &ctx.path)
        }
    }
}

pub(crate) fn is_uri(root: &str) -> bool {
    matches!(Url::parse(root), Ok(url) if url.scheme().len() > 1)
}

fn join_uri(root: &str, path: &str) -> Result<SourceIdentifier> {
    decode_relative(path)?;
    let joined = format!(
        "{}/{}",
        root.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let url = Url::parse(&joined)
        .map_err(|e| ProxyError::Setup(format!("cannot join {} with {}: {}", root, path, e)))?;
    Ok(SourceIdentifier::new(url.to_string()))
}

fn join_local(root: &str, path: &str) -> Result<SourceIdentifier> {
    let relative = decode_relative(path)?;
    let joined = Path::new(root).join(relative);
    Ok(SourceIdentifier::new(joined.to_string_lossy().into_owned()))
}

/// Décode le chemin de la requête et refuse toute remontée au-dessus de la racine
fn decode_relative(path: &str) -> Result<PathBuf> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| ProxyError::Setup(format!("request path is not UTF-8: {}", path)))?;

    let relative = PathBuf::from(decoded.trim_start_matches('/'));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ProxyError::Setup(format!(
                    "request path escapes the root: {}",
                    path
                )));
            }
        }
    }
    Ok(relative)
}
