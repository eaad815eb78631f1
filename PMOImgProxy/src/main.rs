use pmoimgproxy::ImageProxyExt;
use pmoserver::{LoggingOptions, ServerBuilder};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure ==========

    let mut server = ServerBuilder::new_configured().build();

    if let Err(e) = server.init_logging(LoggingOptions::from_config()).await {
        eprintln!("Failed to initialize logging: {}", e);
    }

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "PMOImgProxy", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // ========== PHASE 2 : Proxy d'images ==========

    info!("🖼️ Initializing image proxy...");
    let proxy = server.init_image_proxy_configured().await?;
    if proxy.options().root.starts_with("http") {
        info!("Serving images from origin {}", proxy.options().root);
    } else if !std::path::Path::new(&proxy.options().root).is_dir() {
        warn!("⚠️ Image root {} is not a directory", proxy.options().root);
    }

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    info!("✅ PMOImgProxy is ready!");
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    Ok(())
}
