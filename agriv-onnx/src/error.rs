//! Error types for the agriv-onnx registry

use thiserror::Error;

/// Result type for agriv-onnx operations
pub type AgrivResult<T> = Result<T, AgrivError>;

/// Main error type for model loading, preprocessing and inference
#[derive(Error, Debug)]
pub enum AgrivError {
    #[error("No models were loaded successfully")]
    NoModelsAvailable,

    #[error("Model '{model}' declares {declared} classes but its output has {actual} channels")]
    ClassCountMismatch {
        model: String,
        declared: usize,
        actual: usize,
    },

    #[error("Failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Model '{name}' not found. Available models: {available:?}")]
    UnknownModel {
        name: String,
        available: Vec<String>,
    },

    #[error("Failed to preprocess image: {0}")]
    Preprocessing(#[from] image::ImageError),

    #[error("Invalid image file: {0}")]
    Validation(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgrivError {
    pub fn model_load(model: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that must keep the service from reaching the ready state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoModelsAvailable | Self::ClassCountMismatch { .. } | Self::ModelLoad { .. }
        )
    }

    /// Errors caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel { .. } | Self::Preprocessing(_) | Self::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_lists_available_names() {
        let err = AgrivError::UnknownModel {
            name: "nonexistent_model".to_string(),
            available: vec!["bean".to_string(), "maize".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("nonexistent_model"));
        assert!(msg.contains("bean"));
        assert!(msg.contains("maize"));
        assert!(err.is_client_error());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classification() {
        assert!(AgrivError::NoModelsAvailable.is_fatal());
        assert!(AgrivError::model_load("bean", "corrupt graph").is_fatal());
        assert!(!AgrivError::inference("shape mismatch").is_client_error());
        assert!(AgrivError::validation("too large").is_client_error());
    }
}
