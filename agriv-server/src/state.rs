//! Application state management

use agriv_onnx::Registry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::ServerConfig;

/// Application state shared across handlers.
///
/// Only constructed from a fully loaded registry, so every handler sees the
/// ready state.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<Registry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: Registry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Use the requested model or fall back to the configured default
    pub fn resolve_model(&self, requested: Option<String>) -> String {
        requested
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.config.default_model.clone())
    }
}
