// logs.rs
use std::sync::{Arc, RwLock};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use pmoconfig::get_config;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

const AVAILABLE_LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Poignée sur le filtre de niveau global
///
/// Permet de changer le niveau de log minimal à chaud, sans redémarrer.
#[derive(Clone)]
pub struct LogHandle {
    max_level: Arc<RwLock<Level>>,
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn new(level: Level, reload_handle: reload::Handle<LevelFilter, Registry>) -> Self {
        Self {
            max_level: Arc::new(RwLock::new(level)),
            reload_handle,
        }
    }

    pub fn set_max_level(&self, level: Level) {
        if let Ok(mut current) = self.max_level.write() {
            *current = level;
        }

        let level_filter = LevelFilter::from_level(level);
        match self.reload_handle.reload(level_filter) {
            Ok(()) => tracing::info!("Log level filter reloaded to {}", level_filter),
            Err(e) => tracing::warn!("Failed to reload log level filter: {}", e),
        }
    }

    pub fn get_max_level(&self) -> Level {
        self.max_level
            .read()
            .map(|level| *level)
            .unwrap_or(Level::INFO)
    }
}

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Niveau minimal des événements émis
    pub min_level: Level,
    /// Activer la sortie console
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Lit les options depuis `host.logger` dans la configuration globale
    pub fn from_config() -> Self {
        let config = get_config();
        let defaults = Self::default();

        let min_level = config
            .get_log_min_level()
            .ok()
            .and_then(|l| string_to_level(&l))
            .unwrap_or(defaults.min_level);

        let enable_console = config
            .get_log_enable_console()
            .unwrap_or(defaults.enable_console);

        Self {
            min_level,
            enable_console,
        }
    }
}

/// Initialise le subscriber global
///
/// Le filtre rechargeable est placé en premier pour que le changement de
/// niveau s'applique à toutes les couches.
///
/// # Exemple
/// ```rust,no_run
/// use pmoserver::logs::{init_logging, LoggingOptions};
///
/// let handle = init_logging(LoggingOptions::default()).unwrap();
/// handle.set_max_level(tracing::Level::DEBUG);
/// ```
pub fn init_logging(options: LoggingOptions) -> anyhow::Result<LogHandle> {
    let (filter, reload_handle) = reload::Layer::new(LevelFilter::from_level(options.min_level));
    let handle = LogHandle::new(options.min_level, reload_handle);

    let subscriber = Registry::default().with(filter);

    if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()?;
    } else {
        subscriber.try_init()?;
    }

    Ok(handle)
}

/// Request body pour la configuration du logging
#[derive(Debug, Deserialize)]
pub struct LogSetupRequest {
    pub level: String,
}

/// Response pour la configuration du logging
#[derive(Debug, Serialize, Deserialize)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

impl LogSetupResponse {
    fn new(level: Level) -> Self {
        Self {
            current_level: level_to_string(level),
            available_levels: AVAILABLE_LEVELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Handler pour GET /log_setup - retourne la configuration actuelle
pub async fn log_setup_get(State(handle): State<LogHandle>) -> impl IntoResponse {
    Json(LogSetupResponse::new(handle.get_max_level()))
}

/// Handler pour POST /log_setup - met à jour le niveau de log
pub async fn log_setup_post(
    State(handle): State<LogHandle>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = string_to_level(&payload.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid log level. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE"
            })),
        )
            .into_response();
    };

    handle.set_max_level(level);
    tracing::info!("Log level changed to: {}", payload.level);

    (StatusCode::OK, Json(LogSetupResponse::new(level))).into_response()
}

/// Crée le router pour l'API de gestion des logs
pub fn create_logs_router(handle: LogHandle) -> Router {
    Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(handle)
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_string(level: Level) -> String {
    match level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_string_to_level() {
        assert_eq!(string_to_level("debug"), Some(Level::DEBUG));
        assert_eq!(string_to_level("Warn"), Some(Level::WARN));
        assert_eq!(string_to_level("verbose"), None);
    }

    #[tokio::test]
    async fn test_log_setup_changes_level() {
        let (_layer, reload_handle) = reload::Layer::<LevelFilter, Registry>::new(LevelFilter::INFO);
        let handle = LogHandle::new(Level::INFO, reload_handle);
        let router = create_logs_router(handle.clone());

        let response = router
            .clone()
            .oneshot(
                Request::post("/log_setup")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"level":"debug"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handle.get_max_level(), Level::DEBUG);

        let response = router
            .oneshot(Request::get("/log_setup").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: LogSetupResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.current_level, "DEBUG");
        assert_eq!(body.available_levels.len(), 5);
    }

    #[tokio::test]
    async fn test_log_setup_rejects_unknown_level() {
        let (_layer, reload_handle) = reload::Layer::<LevelFilter, Registry>::new(LevelFilter::INFO);
        let handle = LogHandle::new(Level::INFO, reload_handle);

        let response = create_logs_router(handle.clone())
            .oneshot(
                Request::post("/log_setup")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"level":"loud"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(handle.get_max_level(), Level::INFO);
    }
}
