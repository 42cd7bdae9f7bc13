//! AgriV inference server
//!
//! REST API over an [`agriv_onnx::Registry`]: upload a leaf image, get the
//! crop disease class with its confidence.

mod api;
mod config;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use config::ServerConfig;
pub use error::ServerError;
pub use handlers::{BatchError, BatchResponse, PredictResponse};
pub use state::AppState;

use agriv_onnx::{Registry, RegistryOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Load the models, then serve until ctrl+c
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    info!(
        model_dir = %config.model_dir.display(),
        catalog = ?config.catalog,
        device = %config.device,
        "Starting up inference API"
    );

    let catalog = config.model_catalog()?;
    let options = RegistryOptions {
        device: config.device,
        optimize: true,
    };

    // The listener only binds once every model is loaded
    let registry = tokio::task::spawn_blocking(move || Registry::load(&catalog, &options)).await??;
    info!(models = ?registry.model_names(), "Models loaded successfully");

    if !registry.contains(&config.default_model) {
        warn!(
            default_model = %config.default_model,
            "Default model is not loaded; requests must name a model explicitly"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState::new(config.clone(), registry));
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        address = %addr,
        max_image_size_mb = config.max_image_size / 1024 / 1024,
        pid = std::process::id(),
        "Server listening and ready to accept connections"
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl+c");
            return;
        }
        let stop_time = chrono::Utc::now();
        let uptime = stop_time.signed_duration_since(start_time);
        info!(
            stopped_at = %stop_time.to_rfc3339(),
            uptime_secs = uptime.num_seconds(),
            "Shutting down inference API"
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    drop(state);
    info!("Server shut down cleanly");
    Ok(())
}
