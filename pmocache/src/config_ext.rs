//! Extension pour intégrer la gestion du cache dans pmoconfig
//!
//! Ce module fournit le trait `CacheConfigExt` qui ajoute à
//! `pmoconfig::Config` la lecture des paramètres d'un cache et la création
//! du [`Cache`](crate::Cache) correspondant.

use anyhow::Result;
use async_trait::async_trait;
use pmoconfig::Config;
use serde_yaml::Value;
use std::sync::Arc;

/// Trait d'extension pour ajouter la gestion des caches à pmoconfig
///
/// Les paramètres d'un cache vivent sous une section de premier niveau :
///
/// ```yaml
/// image_cache:
///   enabled: true
///   directory: cache_images
///   size: 2000
/// ```
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmocache::CacheConfigExt;
///
/// let config = get_config();
/// if config.get_cache_enabled("image_cache")? {
///     let cache = config.create_cache("image_cache", "cache_images", 2000).await?;
/// }
/// ```
#[async_trait]
pub trait CacheConfigExt {
    /// Récupère le répertoire d'un cache
    ///
    /// # Arguments
    ///
    /// * `cache_type` - Section du cache (ex: "image_cache")
    /// * `default` - Nom de répertoire par défaut si non configuré
    ///
    /// # Returns
    ///
    /// Le chemin absolu du répertoire du cache
    fn get_cache_dir(&self, cache_type: &str, default: &str) -> Result<String>;

    /// Récupère le nombre maximal d'éléments d'un cache
    fn get_cache_size(&self, cache_type: &str, default: usize) -> Result<usize>;

    /// Indique si le cache est activé (vrai par défaut)
    fn get_cache_enabled(&self, cache_type: &str) -> Result<bool>;

    /// Crée le cache configuré et lance sa consolidation en arrière-plan
    async fn create_cache(
        &self,
        cache_type: &str,
        default_dir: &str,
        default_size: usize,
    ) -> Result<Arc<crate::Cache>>;
}

#[async_trait]
impl CacheConfigExt for Config {
    fn get_cache_dir(&self, cache_type: &str, default: &str) -> Result<String> {
        self.get_managed_dir(&[cache_type, "directory"], default)
    }

    fn get_cache_size(&self, cache_type: &str, default: usize) -> Result<usize> {
        match self.get_value(&[cache_type, "size"]) {
            Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or(default)),
            _ => Ok(default),
        }
    }

    fn get_cache_enabled(&self, cache_type: &str) -> Result<bool> {
        match self.get_value(&[cache_type, "enabled"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(true),
        }
    }

    async fn create_cache(
        &self,
        cache_type: &str,
        default_dir: &str,
        default_size: usize,
    ) -> Result<Arc<crate::Cache>> {
        let dir = self.get_cache_dir(cache_type, default_dir)?;
        let size = self.get_cache_size(cache_type, default_size)?;
        tracing::info!("Opening {} at {} (limit {} entries)", cache_type, dir, size);
        crate::cache::new_cache_with_consolidation(&dir, size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_settings_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        assert!(config.get_cache_enabled("image_cache").unwrap());
        assert_eq!(config.get_cache_size("image_cache", 10).unwrap(), 2000);
        assert_eq!(config.get_cache_size("missing_cache", 10).unwrap(), 10);

        config
            .set_value(&["image_cache", "size"], Value::from(42))
            .unwrap();
        assert_eq!(config.get_cache_size("image_cache", 10).unwrap(), 42);

        let cache_dir = config.get_cache_dir("image_cache", "cache_images").unwrap();
        assert!(cache_dir.ends_with("cache_images"));
        assert!(std::path::Path::new(&cache_dir).is_dir());
    }
}
