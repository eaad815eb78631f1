//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour créer des serveurs HTTP
//! avec Axum, en cachant la configuration du routage et du cycle de vie.
//!
//! ## Fonctionnalités
//!
//! - **Routes JSON simples** : Ajoutez des endpoints avec `add_route()`
//! - **Sous-routers** : Montez un service complet avec `add_router()`
//! - **Logs** : Initialisation du tracing et API de niveau avec `init_logging()`
//! - **Gestion gracieuse** : Arrêt propre sur Ctrl+C

use crate::logs::{LogHandle, LoggingOptions, create_logs_router, init_logging};
use axum::routing::get;
use axum::{Json, Router};
use pmoconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tracing::{error, info, warn};

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - Nom d'hôte annoncé (ex: "localhost")
    /// * `http_port` - Port HTTP à écouter
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new("PMOImgProxy", config.get_base_url(), config.get_http_port())
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure fournie est appelée à chaque requête GET sur `path`.
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// # use pmoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = Server::new("Test", "localhost", 3000);
    /// server.add_route("/api/status", || async {
    ///     serde_json::json!({"status": "online"})
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).route(path, get(handler));
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;

        *r = if path == "/" || path.is_empty() {
            std::mem::take(&mut *r).merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, sub_router)
        };
    }

    /// Retourne une copie du router courant
    ///
    /// Utile pour piloter le serveur sans socket (tests avec `tower::ServiceExt`).
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// Le port est réservé avant le retour : une erreur de bind est remontée
    /// à l'appelant. Ctrl+C déclenche l'arrêt.
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// # use pmoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// # let mut server = Server::new("Test", "localhost", 3000);
    /// server.start().await?;
    /// server.wait().await;  // Attend Ctrl+C
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            "Server {} running at http://{}:{}",
            self.name, self.base_url, self.http_port
        );

        let router = self.router.read().await.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service()).await {
                error!("HTTP server stopped with error: {}", e);
            }
        });

        let shutdown_task = tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = server_task => {},
                _ = shutdown_task => {},
            }
        }));

        Ok(())
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
        }
    }

    /// Initialise le système de logging et enregistre l'API de niveau
    ///
    /// Enregistre `GET/POST /api/log_setup` pour consulter et modifier
    /// le niveau de log à chaud.
    pub async fn init_logging(&mut self, options: LoggingOptions) -> anyhow::Result<LogHandle> {
        let handle = init_logging(options)?;
        self.add_router("/api", create_logs_router(handle.clone()))
            .await;
        Ok(handle)
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    /// Crée un nouveau builder
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: "PMOImgProxy".to_string(),
            base_url: config.get_base_url(),
            http_port: config.get_http_port(),
        }
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_add_route_serves_json() {
        let mut server = ServerBuilder::new("Test", "localhost", 0).build();
        let info = server.info();
        server
            .add_route("/api/info", move || {
                let info = info.clone();
                async move { info }
            })
            .await;

        let response = server
            .router()
            .await
            .oneshot(Request::get("/api/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["name"], "Test");
    }

    #[tokio::test]
    async fn test_add_router_nests_under_path() {
        let mut server = Server::new("Test", "localhost", 0);
        let sub = Router::new().route("/ping", get(|| async { "pong" }));
        server.add_router("/nested/", sub).await;

        let router = server.router().await;
        let response = router
            .clone()
            .oneshot(Request::get("/nested/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
