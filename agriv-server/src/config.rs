//! Server configuration

use agriv_onnx::{AgrivResult, Device, ModelCatalog};
use std::path::PathBuf;

/// Server configuration, defaults read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the built-in models' artifacts
    pub model_dir: PathBuf,
    /// Optional JSON catalog replacing the built-in model table
    pub catalog: Option<PathBuf>,
    pub max_image_size: usize,
    pub supported_formats: Vec<String>,
    pub default_model: String,
    /// Allowed CORS origins, `*` allows any
    pub allowed_origins: Vec<String>,
    pub max_batch_files: usize,
    pub device: Device,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            model_dir: std::env::var("MODEL_DIR")
                .unwrap_or_else(|_| "models".to_string())
                .into(),
            catalog: std::env::var("MODEL_CATALOG").ok().map(PathBuf::from),
            max_image_size: std::env::var("MAX_IMAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(agriv_onnx::preprocess::DEFAULT_MAX_IMAGE_SIZE),
            supported_formats: std::env::var("SUPPORTED_FORMATS")
                .map(|s| split_list(&s))
                .unwrap_or_else(|_| vec!["jpg".into(), "jpeg".into(), "png".into()]),
            default_model: std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "bean".to_string()),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|s| split_list(&s))
                .unwrap_or_else(|_| {
                    vec![
                        "http://localhost:3000".into(),
                        "http://localhost:5000".into(),
                        "http://localhost:5173".into(),
                    ]
                }),
            max_batch_files: std::env::var("MAX_BATCH_FILES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            device: std::env::var("DEVICE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

impl ServerConfig {
    /// The model table: the configured catalog file, or the built-in models
    pub fn model_catalog(&self) -> AgrivResult<ModelCatalog> {
        match &self.catalog {
            Some(path) => ModelCatalog::from_file(path),
            None => Ok(ModelCatalog::builtin(&self.model_dir)),
        }
    }

    /// Largest request body the server accepts
    pub fn body_limit(&self) -> usize {
        self.max_image_size
            .saturating_mul(self.max_batch_files.max(1))
            .saturating_add(64 * 1024)
    }
}

pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
