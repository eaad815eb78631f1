//! Implémentation du trait ImageProxyExt pour le serveur pmoserver
//!
//! `pmoimgproxy` étend `pmoserver::Server` sans que `pmoserver` connaisse
//! `pmoimgproxy` : le proxy est monté comme un sous-router sous son point de
//! montage.
//!
//! ```rust,no_run
//! use pmoimgproxy::ImageProxyExt;
//! use pmoserver::ServerBuilder;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut server = ServerBuilder::new_configured().build();
//! server.init_image_proxy_configured().await?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use crate::{ImageProxy, ImageProxyBuilder, ImageProxyConfigExt, ImageProxyExt, ProxyOptions};
use async_trait::async_trait;
use pmocache::{CacheConfigExt, CacheStore};
use pmoserver::Server;
use std::sync::Arc;
use tracing::info;

const IMAGE_CACHE: &str = "image_cache";
const DEFAULT_CACHE_DIR: &str = "cache_images";
const DEFAULT_CACHE_SIZE: usize = 2000;

#[async_trait]
impl ImageProxyExt for Server {
    async fn init_image_proxy(
        &mut self,
        mount: &str,
        options: ProxyOptions,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> anyhow::Result<ImageProxy> {
        let mut builder = ImageProxyBuilder::new(options);
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        let proxy = builder.build()?;

        self.add_router(mount, proxy.router()).await;
        info!(
            "Image proxy mounted on {} (root {})",
            mount,
            proxy.options().root
        );

        Ok(proxy)
    }

    async fn init_image_proxy_configured(&mut self) -> anyhow::Result<ImageProxy> {
        let config = pmoconfig::get_config();

        let options = config.get_proxy_options()?;
        let mount = config.get_proxy_mount()?;

        let cache: Option<Arc<dyn CacheStore>> = if config.get_cache_enabled(IMAGE_CACHE)? {
            let cache = config
                .create_cache(IMAGE_CACHE, DEFAULT_CACHE_DIR, DEFAULT_CACHE_SIZE)
                .await?;
            Some(cache as Arc<dyn CacheStore>)
        } else {
            info!("Image cache disabled");
            None
        };

        self.init_image_proxy(&mount, options, cache).await
    }
}
