//! # pmoimgproxy - Proxy de diffusion d'images
//!
//! Cette crate sert des images depuis un répertoire local ou une origine HTTP,
//! avec recadrage ou redimensionnement à la volée décrits par la query string,
//! et un cache optionnel des sources non transformées.
//!
//! ## Pipeline
//!
//! ```text
//! GET /images/cat.png?w=100&h=50
//!   │
//!   ├─ Resolver            chemin → SourceIdentifier (fichier ou URI)
//!   ├─ CacheAside          get ─ miss ─► Backend ─► fan_out ─┬─► réponse
//!   │                                                      └─► CacheStore::set
//!   ├─ TransformDispatcher passthrough | crop | scale (ImageCodec)
//!   └─ response            en-têtes, ETag, streaming
//! ```
//!
//! ## Paramètres
//!
//! | Paramètres             | Opération                         |
//! |------------------------|-----------------------------------|
//! | aucun                  | source relayée telle quelle       |
//! | (`x` ou `y`) et (`w` ou `h`) | recadrage                   |
//! | `w` et/ou `h`          | redimensionnement                 |
//! | `r`                    | valeurs en pourcentage            |
//!
//! ## Erreurs
//!
//! | Catégorie   | Statut | Corps                    |
//! |-------------|--------|--------------------------|
//! | NotFound    | 404    | vide, marqué [`Deferred`] |
//! | Setup       | 404    | JSON opaque              |
//! | Transform   | 500    | JSON opaque              |
//! | Upstream    | 500    | JSON opaque              |
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmoimgproxy::{ImageProxyBuilder, ProxyOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let proxy = ImageProxyBuilder::new(ProxyOptions::new("/srv/images")).build()?;
//!     let app = axum::Router::new().nest("/images", proxy.router());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache_aside;
pub mod codec;
pub mod error;
pub mod params;
pub mod proxy;
pub mod resolver;
pub mod response;
pub mod transform;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

pub use backend::{Backend, DefaultBackend, FetchResult, FileBackend, HttpBackend};
pub use cache_aside::CacheAside;
pub use codec::{Encoded, ImageCodec, ImageRsCodec};
pub use error::{Deferred, ErrorResponse, ProxyError, Result};
pub use params::{CropRect, Dimensions, FitMode, Operation, ScaleTarget, TransformSpec};
pub use proxy::{
    DEFAULT_MAX_OUTPUT_PIXELS, DEFAULT_MAX_SOURCE_BYTES, ImageProxy, ImageProxyBuilder, ProxyOptions,
};
pub use resolver::{DefaultResolver, RequestContext, Resolver, SourceIdentifier, SourceKind};
pub use response::HeaderOverride;
pub use transform::{Dispatched, TransformDispatcher};

#[cfg(feature = "pmoconfig")]
pub use config_ext::ImageProxyConfigExt;

#[cfg(feature = "pmoserver")]
use std::sync::Arc;

/// Trait d'extension pour monter le proxy dans `pmoserver`
#[cfg(feature = "pmoserver")]
#[async_trait::async_trait]
pub trait ImageProxyExt {
    /// Construit le proxy et enregistre son router sous `mount`
    ///
    /// # Arguments
    ///
    /// * `mount` - Point de montage (ex: "/images")
    /// * `options` - Options figées du proxy
    /// * `cache` - Cache des sources, optionnel
    async fn init_image_proxy(
        &mut self,
        mount: &str,
        options: ProxyOptions,
        cache: Option<Arc<dyn pmocache::CacheStore>>,
    ) -> anyhow::Result<ImageProxy>;

    /// Même chose à partir de la configuration (`proxy` et `image_cache`)
    async fn init_image_proxy_configured(&mut self) -> anyhow::Result<ImageProxy>;
}
