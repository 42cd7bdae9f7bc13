//! AgriV inference server entry point

use std::path::PathBuf;

use agriv_onnx::Device;
use agriv_server::{run_server, ServerConfig};
use clap::Parser;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "agriv-server")]
#[command(about = "Crop disease classification API on ONNX Runtime")]
struct Cli {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory containing bean_model.onnx and maize_model.onnx
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// JSON model catalog replacing the built-in models
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// Model used when a request does not name one
    #[arg(long)]
    default_model: Option<String>,

    /// Execution device, e.g. "cpu" or "cpu:4"
    #[arg(long)]
    device: Option<Device>,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(model_dir) = self.model_dir {
            config.model_dir = model_dir;
        }
        if let Some(catalog) = self.catalog {
            config.catalog = Some(catalog);
        }
        if let Some(default_model) = self.default_model {
            config.default_model = default_model;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agriv_server=info,agriv_onnx=info,tower_http=info".into()),
        )
        .init();

    let config = Cli::parse().into_config();
    run_server(config).await
}
