//! # pmoconfig - Configuration de PMOImgProxy
//!
//! La configuration est un arbre YAML unique, construit au démarrage par
//! couches successives :
//!
//! 1. les valeurs par défaut intégrées au binaire (`pmoimgproxy.yaml`)
//! 2. le fichier `config.yaml` du répertoire de configuration, s'il existe
//! 3. les variables d'environnement `PMOIMGPROXY_CONFIG__SECTION__CLE`
//!
//! Les clés sont insensibles à la casse. L'arbre fusionné est réécrit dans
//! `config.yaml` à chaque chargement et à chaque modification.
//!
//! Les crates de domaine (le proxy, son cache) ajoutent leurs accesseurs
//! typés par des traits d'extension construits sur [`Config::get_value`] et
//! [`Config::set_value`].
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let level = config.get_log_min_level()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::info;

const DEFAULT_CONFIG: &str = include_str!("pmoimgproxy.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOImgProxy configuration"));
}

/// Variable désignant explicitement le répertoire de configuration
const ENV_CONFIG_DIR: &str = "PMOIMGPROXY_CONFIG";
/// Préfixe des surcharges, `__` séparant les niveaux
const ENV_PREFIX: &str = "PMOIMGPROXY_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoimgproxy";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_BASE_URL: &str = "localhost";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Configuration chargée, partagée entre les threads
#[derive(Debug)]
pub struct Config {
    dir: PathBuf,
    file: PathBuf,
    tree: Mutex<Value>,
}

impl Config {
    /// Charge la configuration depuis `directory`
    ///
    /// Si `directory` est vide, le répertoire est cherché dans l'ordre :
    /// `$PMOIMGPROXY_CONFIG`, `./.pmoimgproxy`, `~/.pmoimgproxy`. À défaut
    /// `./.pmoimgproxy` est créé.
    pub fn load_config(directory: &str) -> Result<Self> {
        let dir = locate_dir(directory);
        prepare_dir(&dir)?;
        info!(config_dir=%dir.display(), "Using config directory");

        let file = dir.join(CONFIG_FILE_NAME);
        let mut tree = lowercase_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);

        match fs::read_to_string(&file) {
            Ok(text) => {
                let external: Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("invalid YAML in {}", file.display()))?;
                merge_yaml(&mut tree, &lowercase_keys(external));
                info!(config_file=%file.display(), "Loaded config file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(config_file=%file.display(), "No config file, using embedded defaults");
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", file.display())),
        }

        for (path, value) in env_overrides(env::vars()) {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            if let Err(e) = insert_at(&mut tree, &path, value) {
                tracing::warn!("Ignoring override {}: {}", path.join("."), e);
            }
        }

        let config = Config {
            dir,
            file,
            tree: Mutex::new(tree),
        };
        config.persist()?;
        Ok(config)
    }

    fn persist(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.tree.lock().unwrap())?;
        fs::write(&self.file, yaml)?;
        Ok(())
    }

    /// Lit la valeur au chemin `path` (ex: `&["host", "http_port"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let tree = self.tree.lock().unwrap();
        find(&tree, path)
            .cloned()
            .ok_or_else(|| anyhow!("Path {} does not exist", path.join(".")))
    }

    /// Écrit la valeur au chemin `path`, crée les sections manquantes puis
    /// réécrit `config.yaml`
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        insert_at(&mut self.tree.lock().unwrap(), path, value)?;
        self.persist()
    }

    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    /// Répertoire géré par la configuration
    ///
    /// Un chemin relatif est résolu par rapport au répertoire de
    /// configuration. Absent de la configuration, `default` y est enregistré.
    /// Le répertoire est créé s'il n'existe pas.
    ///
    /// ```no_run
    /// use pmoconfig::get_config;
    ///
    /// let cache_dir = get_config().get_managed_dir(&["image_cache", "directory"], "cache_images")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let configured = match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };

        let dir = self.dir.join(&configured);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
            info!(directory=%dir.display(), "Created managed directory");
        }
        Ok(dir.to_string_lossy().into_owned())
    }

    /// URL de base annoncée (`localhost` si vide)
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Port d'écoute ; une valeur invalide est signalée et remplacée par 8080
    pub fn get_http_port(&self) -> u16 {
        let port = match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Ok(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        port.unwrap_or_else(|| {
            tracing::warn!("Invalid host.http_port, using default {}", DEFAULT_HTTP_PORT);
            DEFAULT_HTTP_PORT
        })
    }

    pub fn get_log_min_level(&self) -> Result<String> {
        Ok(self.get_string_or(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL))
    }

    pub fn get_log_enable_console(&self) -> Result<bool> {
        match self.get_value(&["host", "logger", "enable_console"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(true),
        }
    }
}

/// Configuration globale, chargée au premier accès
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn locate_dir(explicit: &str) -> PathBuf {
    if !explicit.is_empty() {
        return PathBuf::from(explicit);
    }
    if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
        return PathBuf::from(dir);
    }

    let local = PathBuf::from(CONFIG_DIR_NAME);
    let home = dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME));
    [Some(local.clone()), home]
        .into_iter()
        .flatten()
        .find(|candidate| candidate.is_dir())
        .unwrap_or(local)
}

fn prepare_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create config directory {}", dir.display()))?;
    if fs::metadata(dir)?.permissions().readonly() {
        return Err(anyhow!("Config directory {} is read-only", dir.display()));
    }
    Ok(())
}

fn find<'a>(tree: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(tree, |node, key| {
        node.as_mapping()?.get(Value::String(key.to_lowercase()))
    })
}

fn insert_at(tree: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return Ok(());
    };

    let mut node = tree;
    for key in parents {
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| anyhow!("{} is not a section", key))?;
        node = map
            .entry(Value::String(key.to_lowercase()))
            .or_insert(Value::Mapping(Mapping::new()));
    }
    node.as_mapping_mut()
        .ok_or_else(|| anyhow!("parent of {} is not a section", last))?
        .insert(Value::String(last.to_lowercase()), value);
    Ok(())
}

/// Extrait les surcharges `PMOIMGPROXY_CONFIG__A__B=valeur`
///
/// La valeur est interprétée comme du YAML (`42`, `true`, `~`), sinon
/// conservée comme chaîne.
fn env_overrides(
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<(Vec<String>, Value)> {
    vars.into_iter()
        .filter_map(|(name, raw)| {
            let path = name.strip_prefix(ENV_PREFIX)?;
            let path: Vec<String> = path.split("__").map(str::to_lowercase).collect();
            let value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
            Some((path, value))
        })
        .collect()
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lowercase_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Fusionne `external` dans `base` : les sections sont fusionnées clé par
/// clé, les scalaires et les listes remplacés
fn merge_yaml(base: &mut Value, external: &Value) {
    match (base, external) {
        (Value::Mapping(base), Value::Mapping(external)) => {
            for (key, value) in external {
                match base.get_mut(key) {
                    Some(slot) => merge_yaml(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_load_defaults_into_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_http_port(), 8080);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_log_enable_console().unwrap());
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_external_file_is_merged_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Host:\n  HTTP_Port: 9191\nproxy:\n  root: /srv/pictures\n",
        )
        .unwrap();

        let config = load(&dir);

        assert_eq!(config.get_http_port(), 9191);
        assert_eq!(config.get_string_or(&["proxy", "root"], "x"), "/srv/pictures");
        assert_eq!(config.get_string_or(&["proxy", "mount"], "x"), "/images");
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "host: [unclosed\n").unwrap();
        assert!(Config::load_config(dir.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_set_value_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        config
            .set_value(&["host", "http_port"], Value::from(7000))
            .unwrap();
        config
            .set_value(&["host", "logger", "min_level"], Value::from("debug"))
            .unwrap();
        config
            .set_value(&["new_section", "Key"], Value::Bool(false))
            .unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.get_http_port(), 7000);
        assert_eq!(reloaded.get_log_min_level().unwrap(), "debug");
        assert_eq!(
            reloaded.get_value(&["new_section", "key"]).unwrap(),
            Value::Bool(false)
        );
        assert!(reloaded.get_value(&["new_section", "other"]).is_err());
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        config
            .set_value(&["host", "http_port"], Value::from(70000))
            .unwrap();
        assert_eq!(config.get_http_port(), 8080);

        config
            .set_value(&["host", "http_port"], Value::from("9090"))
            .unwrap();
        assert_eq!(config.get_http_port(), 9090);
    }

    #[test]
    fn test_managed_dir_is_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        let managed = config
            .get_managed_dir(&["image_cache", "directory"], "cache_images")
            .unwrap();
        assert_eq!(Path::new(&managed), dir.path().join("cache_images"));
        assert!(Path::new(&managed).is_dir());

        let absolute = tempfile::tempdir().unwrap();
        let target = absolute.path().join("pictures");
        config
            .set_value(
                &["proxy", "root"],
                Value::from(target.to_str().unwrap()),
            )
            .unwrap();
        let managed = config.get_managed_dir(&["proxy", "root"], "images").unwrap();
        assert_eq!(Path::new(&managed), target);
        assert!(target.is_dir());
    }

    #[test]
    fn test_missing_managed_dir_records_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        config.get_managed_dir(&["thumbs", "directory"], "thumbs").unwrap();
        assert_eq!(
            config.get_value(&["thumbs", "directory"]).unwrap(),
            Value::from("thumbs")
        );
    }

    #[test]
    fn test_merge_yaml_replaces_scalars_and_keeps_siblings() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: [1, 2]\n").unwrap();
        let external: Value = serde_yaml::from_str("b:\n  c: 5\n  d: [3]\n").unwrap();

        merge_yaml(&mut base, &external);

        assert_eq!(find(&base, &["b", "c"]), Some(&Value::from(5)));
        assert_eq!(
            find(&base, &["b", "d"]),
            Some(&serde_yaml::from_str::<Value>("[3]").unwrap())
        );
        assert_eq!(find(&base, &["a"]), Some(&Value::from(1)));
    }

    #[test]
    fn test_env_overrides_are_typed_and_scoped() {
        let vars = vec![
            ("PMOIMGPROXY_CONFIG__HOST__HTTP_PORT".to_string(), "9000".to_string()),
            ("PMOIMGPROXY_CONFIG__PROXY__ROOT".to_string(), "https://cdn/x".to_string()),
            ("PMOIMGPROXY_CONFIG__IMAGE_CACHE__ENABLED".to_string(), "false".to_string()),
            ("PMOIMGPROXY_CONFIG".to_string(), "/etc/pmo".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];

        let overrides = env_overrides(vars);
        assert_eq!(overrides.len(), 3);
        assert_eq!(
            overrides[0],
            (vec!["host".to_string(), "http_port".to_string()], Value::from(9000))
        );
        assert_eq!(overrides[1].1, Value::from("https://cdn/x"));
        assert_eq!(overrides[2].1, Value::Bool(false));

        let mut tree = lowercase_keys(serde_yaml::from_str(DEFAULT_CONFIG).unwrap());
        for (path, value) in overrides {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            insert_at(&mut tree, &path, value).unwrap();
        }
        assert_eq!(find(&tree, &["host", "http_port"]), Some(&Value::from(9000)));
        assert_eq!(find(&tree, &["proxy", "mount"]), Some(&Value::from("/images")));
    }
}
