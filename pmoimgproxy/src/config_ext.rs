//! Extension pour lire les options du proxy depuis pmoconfig
//!
//! ```yaml
//! proxy:
//!   mount: /images
//!   root: images            # répertoire (relatif au config_dir) ou URI
//!   http_timeout_secs: 30
//!   max_source_bytes: 52428800
//!   max_output_pixels: 40000000
//!   fanout_buffer_chunks: 16
//!   headers:
//!     cache-control: "public, max-age=86400"
//!     x-powered-by: ~       # null : l'en-tête est retiré
//! ```

use crate::proxy::{DEFAULT_MAX_OUTPUT_PIXELS, DEFAULT_MAX_SOURCE_BYTES, ProxyOptions};
use crate::resolver::is_uri;
use crate::response::HeaderOverride;
use anyhow::{Result, anyhow};
use axum::http::{HeaderName, HeaderValue};
use pmoconfig::Config;
use serde_yaml::Value;
use std::time::Duration;

const DEFAULT_MOUNT: &str = "/images";
const DEFAULT_ROOT_DIR: &str = "images";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FANOUT_CHUNKS: usize = 16;

/// Trait d'extension pour la configuration du proxy d'images
pub trait ImageProxyConfigExt {
    /// Point de montage du proxy dans le serveur (default: "/images")
    fn get_proxy_mount(&self) -> Result<String>;

    /// Racine des sources
    ///
    /// Une URI est retournée telle quelle ; un chemin est résolu par rapport
    /// au répertoire de configuration et créé s'il n'existe pas.
    fn get_proxy_root(&self) -> Result<String>;

    fn get_proxy_http_timeout(&self) -> Result<Duration>;

    fn get_proxy_max_source_bytes(&self) -> Result<u64>;

    fn get_proxy_max_output_pixels(&self) -> Result<u64>;

    fn get_proxy_fanout_capacity(&self) -> Result<usize>;

    /// En-têtes imposés par la configuration, `null` valant retrait
    fn get_proxy_headers(&self) -> Result<Vec<(HeaderName, HeaderOverride)>>;

    /// Assemble les [`ProxyOptions`] complètes
    fn get_proxy_options(&self) -> Result<ProxyOptions> {
        Ok(ProxyOptions {
            root: self.get_proxy_root()?,
            headers: self.get_proxy_headers()?,
            max_source_bytes: self.get_proxy_max_source_bytes()?,
            max_output_pixels: self.get_proxy_max_output_pixels()?,
            fanout_capacity: self.get_proxy_fanout_capacity()?,
            http_timeout: self.get_proxy_http_timeout()?,
        })
    }
}

fn get_u64(config: &Config, key: &str, default: u64) -> u64 {
    match config.get_value(&["proxy", key]) {
        Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
        _ => default,
    }
}

impl ImageProxyConfigExt for Config {
    fn get_proxy_mount(&self) -> Result<String> {
        Ok(self.get_string_or(&["proxy", "mount"], DEFAULT_MOUNT))
    }

    fn get_proxy_root(&self) -> Result<String> {
        match self.get_value(&["proxy", "root"]) {
            Ok(Value::String(root)) if is_uri(&root) => Ok(root),
            _ => self.get_managed_dir(&["proxy", "root"], DEFAULT_ROOT_DIR),
        }
    }

    fn get_proxy_http_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_secs(get_u64(
            self,
            "http_timeout_secs",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )))
    }

    fn get_proxy_max_source_bytes(&self) -> Result<u64> {
        Ok(get_u64(self, "max_source_bytes", DEFAULT_MAX_SOURCE_BYTES))
    }

    fn get_proxy_max_output_pixels(&self) -> Result<u64> {
        Ok(get_u64(self, "max_output_pixels", DEFAULT_MAX_OUTPUT_PIXELS))
    }

    fn get_proxy_fanout_capacity(&self) -> Result<usize> {
        Ok(get_u64(self, "fanout_buffer_chunks", DEFAULT_FANOUT_CHUNKS as u64) as usize)
    }

    fn get_proxy_headers(&self) -> Result<Vec<(HeaderName, HeaderOverride)>> {
        let map = match self.get_value(&["proxy", "headers"]) {
            Ok(Value::Mapping(map)) => map,
            Ok(Value::Null) | Err(_) => return Ok(Vec::new()),
            Ok(_) => return Err(anyhow!("proxy.headers must be a mapping")),
        };

        let mut headers = Vec::with_capacity(map.len());
        for (name, value) in map {
            let Value::String(name) = name else {
                return Err(anyhow!("proxy.headers keys must be strings"));
            };
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid header name {:?}: {}", name, e))?;

            let value = match value {
                Value::Null => HeaderOverride::Unset,
                Value::String(s) => HeaderOverride::Set(HeaderValue::from_str(&s)?),
                Value::Number(n) => HeaderOverride::Set(HeaderValue::from_str(&n.to_string())?),
                Value::Bool(b) => HeaderOverride::Set(HeaderValue::from_str(&b.to_string())?),
                _ => return Err(anyhow!("invalid value for header {}", name)),
            };
            headers.push((header, value));
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn test_proxy_options_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let options = config.get_proxy_options().unwrap();
        assert!(options.root.ends_with("images"));
        assert!(std::path::Path::new(&options.root).is_dir());
        assert_eq!(options.http_timeout, Duration::from_secs(30));
        assert_eq!(options.max_source_bytes, 52428800);
        assert_eq!(options.max_output_pixels, 40_000_000);
        assert_eq!(options.fanout_capacity, 16);
        assert_eq!(config.get_proxy_mount().unwrap(), "/images");

        assert!(options.headers.contains(&(
            header::CACHE_CONTROL,
            HeaderOverride::Set(HeaderValue::from_static("public, max-age=86400"))
        )));
        assert!(options.headers.contains(&(
            HeaderName::from_static("x-powered-by"),
            HeaderOverride::Unset
        )));
    }

    #[test]
    fn test_uri_root_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        config
            .set_value(
                &["proxy", "root"],
                Value::String("https://cdn.example.com/assets".to_string()),
            )
            .unwrap();
        assert_eq!(config.get_proxy_root().unwrap(), "https://cdn.example.com/assets");
    }

    #[test]
    fn test_output_limit_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        config
            .set_value(&["proxy", "max_output_pixels"], Value::Number(1000.into()))
            .unwrap();
        assert_eq!(config.get_proxy_options().unwrap().max_output_pixels, 1000);
    }
}
