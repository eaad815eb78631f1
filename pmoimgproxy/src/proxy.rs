//! Assemblage du pipeline et handler axum
//!
//! ```text
//! requête ─► Resolver ─► CacheAside ─► TransformDispatcher ─► response
//! ```

use crate::backend::{Backend, DefaultBackend};
use crate::cache_aside::CacheAside;
use crate::codec::{ImageCodec, ImageRsCodec};
use crate::error::{ProxyError, Result};
use crate::params::{Operation, TransformSpec};
use crate::resolver::{DefaultResolver, RequestContext, Resolver};
use crate::response::{self, HeaderOverride};
use crate::transform::{Dispatched, TransformDispatcher};
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use pmocache::CacheStore;
use std::sync::Arc;
use std::time::Duration;

/// Taille maximale par défaut d'une source à transformer (50 Mio)
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 50 * 1024 * 1024;

/// Surface maximale par défaut d'une image redimensionnée (40 Mpx)
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 40_000_000;

/// Options du proxy, figées à la construction
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Racine des sources : répertoire local ou URI de base
    pub root: String,
    /// En-têtes imposés à chaque réponse
    pub headers: Vec<(HeaderName, HeaderOverride)>,
    pub max_source_bytes: u64,
    /// Surface maximale, en pixels, d'une cible de redimensionnement
    pub max_output_pixels: u64,
    /// Avance maximale, en chunks, d'une branche du fan-out sur l'autre
    pub fanout_capacity: usize,
    pub http_timeout: Duration,
}

impl ProxyOptions {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderOverride) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            headers: Vec::new(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_output_pixels: DEFAULT_MAX_OUTPUT_PIXELS,
            fanout_capacity: 16,
            http_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    options: ProxyOptions,
    resolver: Arc<dyn Resolver>,
    loader: CacheAside,
    dispatcher: TransformDispatcher,
}

/// Proxy d'images
///
/// Clonable à faible coût : l'état est partagé.
#[derive(Clone)]
pub struct ImageProxy {
    inner: Arc<Inner>,
}

/// Constructeur d'[`ImageProxy`]
///
/// # Exemple
///
/// ```rust,no_run
/// use pmoimgproxy::{ImageProxyBuilder, ProxyOptions};
///
/// # fn demo() -> pmoimgproxy::Result<()> {
/// let proxy = ImageProxyBuilder::new(ProxyOptions::new("/srv/images")).build()?;
/// let app = axum::Router::new().nest("/images", proxy.router());
/// # let _ = app;
/// # Ok(())
/// # }
/// ```
pub struct ImageProxyBuilder {
    options: ProxyOptions,
    resolver: Option<Arc<dyn Resolver>>,
    backend: Option<Arc<dyn Backend>>,
    codec: Option<Arc<dyn ImageCodec>>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl ImageProxyBuilder {
    pub fn new(options: ProxyOptions) -> Self {
        Self {
            options,
            resolver: None,
            backend: None,
            codec: None,
            cache: None,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<ImageProxy> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(DefaultBackend::new(self.options.http_timeout)?),
        };
        let codec = self.codec.unwrap_or_else(|| Arc::new(ImageRsCodec));

        Ok(ImageProxy {
            inner: Arc::new(Inner {
                resolver: self.resolver.unwrap_or_else(|| Arc::new(DefaultResolver)),
                loader: CacheAside::new(backend, self.cache, self.options.fanout_capacity),
                dispatcher: TransformDispatcher::new(
                    codec,
                    self.options.max_source_bytes,
                    self.options.max_output_pixels,
                ),
                options: self.options,
            }),
        })
    }
}

impl ImageProxy {
    pub fn options(&self) -> &ProxyOptions {
        &self.inner.options
    }

    /// Traite une requête ; les erreurs sont converties en réponse
    pub async fn handle(&self, ctx: RequestContext) -> Response {
        match self.serve(ctx).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn serve(&self, ctx: RequestContext) -> Result<Response> {
        let inner = &self.inner;

        let spec = TransformSpec::from_query(ctx.query.as_deref())?
            .filter(|s| s.operation() != Operation::Passthrough);

        let id = inner
            .resolver
            .resolve(&inner.options.root, &ctx)
            .await
            .map_err(|e| match e {
                ProxyError::Setup(_) => e,
                other => ProxyError::Setup(other.to_string()),
            })?;
        tracing::debug!("Resolved {} to {} ({:?})", ctx.path, id, spec);

        let fetched = inner.loader.fetch(&id).await?;
        let headers = &inner.options.headers;

        match inner.dispatcher.dispatch(spec.as_ref(), fetched).await? {
            Dispatched::Passthrough(fetched) => response::passthrough(fetched, headers).await,
            Dispatched::Transformed {
                encoded,
                validator,
                spec,
            } => Ok(response::transformed(
                encoded,
                validator.as_deref(),
                &spec,
                headers,
            )),
        }
    }

    /// Router servant toutes les lectures sous son point de montage
    ///
    /// Les routes `/` et `/{*path}` capturent tout le point de montage, donc
    /// le fallback d'un router englobant n'est jamais atteint. Une source
    /// absente répond un 404 vide portant l'extension [`Deferred`](crate::Deferred) ; l'hôte
    /// qui veut enchaîner sur son propre handler le détecte dans un
    /// middleware :
    ///
    /// ```rust,no_run
    /// use axum::extract::Request;
    /// use axum::http::StatusCode;
    /// use axum::middleware::{self, Next};
    /// use axum::response::{IntoResponse, Response};
    /// use pmoimgproxy::{Deferred, ImageProxy};
    ///
    /// async fn fallback(req: Request, next: Next) -> Response {
    ///     let response = next.run(req).await;
    ///     if response.extensions().get::<Deferred>().is_some() {
    ///         return (StatusCode::NOT_FOUND, "no such image").into_response();
    ///     }
    ///     response
    /// }
    /// # fn mount(proxy: &ImageProxy) -> axum::Router {
    /// axum::Router::new()
    ///     .nest("/images", proxy.router())
    ///     .layer(middleware::from_fn(fallback))
    /// # }
    /// ```
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(serve_image))
            .route("/{*path}", get(serve_image))
            .with_state(self.clone())
    }
}

async fn serve_image(State(proxy): State<ImageProxy>, uri: Uri, headers: HeaderMap) -> Response {
    let ctx = RequestContext {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
    };
    proxy.handle(ctx).await
}
