//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour héberger des services HTTP
//! avec Axum. Les crates de services (comme `pmoimgproxy`) s'y branchent via
//! des traits d'extension sur [`Server`].
//!
//! ## Architecture
//!
//! - [`server`] : Implémentation du serveur principal et du builder
//! - [`logs`] : Initialisation du tracing et changement de niveau à chaud
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "localhost", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await?;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogHandle, LoggingOptions};
pub use server::{Server, ServerBuilder, ServerInfo};
