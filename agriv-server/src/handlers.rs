//! HTTP request handlers

use std::sync::Arc;

use agriv_onnx::{
    augment, decode_validated, image_to_tensor, AgrivError, AgrivResult, Augmentation,
    ModelInfo, PredictionResult, Registry,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::error::{Result, ServerError};
use super::state::AppState;
use super::ServerConfig;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    model_name: Option<String>,
    #[serde(default)]
    augmentation: Augmentation,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    /// Alias of `predicted_class` kept for older clients
    pub disease: String,
    pub crop_type: String,
    pub model: String,
    pub filename: String,
}

impl PredictResponse {
    fn new(result: PredictionResult, filename: String) -> Self {
        Self {
            disease: result.predicted_class.clone(),
            crop_type: result.model_used.clone(),
            model: result.model_used.clone(),
            filename,
            result,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub model: String,
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<PredictResponse>,
    pub errors: Option<Vec<BatchError>>,
}

struct Upload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl Upload {
    fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

async fn read_uploads(multipart: &mut Multipart) -> Result<Vec<Upload>> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        if !matches!(field.name(), Some("file") | Some("files")) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;

        info!(filename = %filename, size = bytes.len(), "Received file");
        uploads.push(Upload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Ok(uploads)
}

/// Bytes-to-tensor steps applied to every upload
#[derive(Debug, Clone)]
struct ImagePipeline {
    max_image_size: usize,
    formats: Vec<String>,
    augmentation: Augmentation,
}

impl ImagePipeline {
    fn new(config: &ServerConfig, augmentation: Augmentation) -> Self {
        Self {
            max_image_size: config.max_image_size,
            formats: config.supported_formats.clone(),
            augmentation,
        }
    }

    fn tensor(&self, registry: &Registry, model_name: &str, bytes: &[u8]) -> AgrivResult<Array4<f32>> {
        let size = registry.input_size(model_name)?;
        if !self.augmentation.preserves_size(size) {
            return Err(AgrivError::validation(format!(
                "Augmentation {:?} needs a square input, model '{model_name}' expects {}x{}",
                self.augmentation, size.0, size.1
            )));
        }

        let image = decode_validated(bytes, self.max_image_size, self.formats.as_slice())?;
        Ok(augment(image_to_tensor(image, size, true), self.augmentation))
    }
}

// ============================================================================
// Status Handlers
// ============================================================================

pub async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "message": "AgriV AI Inference API",
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": !state.registry.is_empty(),
        "available_models": state.registry.model_names(),
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: serde_json::Map<String, serde_json::Value> = state
        .registry
        .all_model_info()
        .into_iter()
        .map(|(name, info)| {
            (
                name,
                json!({
                    "loaded": true,
                    "input_shape": info.input.shape,
                    "output_shape": info.output.shape,
                }),
            )
        })
        .collect();

    let uptime = chrono::Utc::now().signed_duration_since(state.started_at);

    Json(json!({
        "status": "healthy",
        "uptime_secs": uptime.num_seconds(),
        "models": models,
    }))
}

// ============================================================================
// Model Handlers
// ============================================================================

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "models": state.registry.all_model_info() }))
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model_name): Path<String>,
) -> Result<Json<ModelInfo>> {
    Ok(Json(state.registry.model_info(&model_name)?))
}

// ============================================================================
// Inference Handlers
// ============================================================================

/// Classify a single uploaded image
pub async fn predict(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PredictQuery>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>> {
    let model_name = state.resolve_model(query.model_name);

    let upload = read_uploads(&mut multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServerError::BadRequest("Missing 'file' field".to_string()))?;

    if !upload.is_image() {
        return Err(ServerError::BadRequest(format!(
            "Invalid file type: {}. Please upload an image file.",
            upload.content_type
        )));
    }

    info!(filename = %upload.filename, model = %model_name, "Processing image");

    let registry = state.registry();
    let pipeline = ImagePipeline::new(&state.config, query.augmentation);
    let name = model_name.clone();
    let bytes = upload.bytes;

    let result = tokio::task::spawn_blocking(move || {
        let tensor = pipeline.tensor(&registry, &name, &bytes)?;
        registry.predict(&name, tensor.view())
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Prediction task failed: {e}")))??;

    info!(
        class = %result.predicted_class,
        confidence = result.confidence,
        model = %model_name,
        "Prediction successful"
    );

    Ok(Json(PredictResponse::new(result, upload.filename)))
}

/// Classify several uploaded images; failures are reported per file
pub async fn predict_batch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PredictQuery>,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>> {
    let model_name = state.resolve_model(query.model_name);
    let uploads = read_uploads(&mut multipart).await?;

    if uploads.is_empty() {
        return Err(ServerError::BadRequest("No files uploaded".to_string()));
    }
    if uploads.len() > state.config.max_batch_files {
        return Err(ServerError::BadRequest(format!(
            "Maximum {} images per batch",
            state.config.max_batch_files
        )));
    }

    let registry = state.registry();
    registry.input_size(&model_name)?;

    let total_files = uploads.len();
    let pipeline = ImagePipeline::new(&state.config, query.augmentation);
    let name = model_name.clone();

    let (results, errors) =
        tokio::task::spawn_blocking(move || classify_batch(&registry, &name, &pipeline, uploads))
            .await
            .map_err(|e| ServerError::Internal(format!("Batch task failed: {e}")))?;

    info!(
        model = %model_name,
        total = total_files,
        successful = results.len(),
        failed = errors.len(),
        "Batch prediction finished"
    );

    Ok(Json(BatchResponse {
        model: model_name,
        total_files,
        successful: results.len(),
        failed: errors.len(),
        results,
        errors: (!errors.is_empty()).then_some(errors),
    }))
}

fn classify_batch(
    registry: &Registry,
    model_name: &str,
    pipeline: &ImagePipeline,
    uploads: Vec<Upload>,
) -> (Vec<PredictResponse>, Vec<BatchError>) {
    let mut errors = Vec::new();
    let mut prepared = Vec::new();

    for upload in uploads {
        if !upload.is_image() {
            errors.push(BatchError {
                error: format!("Invalid file type: {}", upload.content_type),
                filename: upload.filename,
            });
            continue;
        }

        match pipeline.tensor(registry, model_name, &upload.bytes) {
            Ok(tensor) => prepared.push((upload.filename, tensor)),
            Err(e) => {
                warn!(filename = %upload.filename, error = %e, "Error processing file");
                errors.push(BatchError {
                    filename: upload.filename,
                    error: e.to_string(),
                });
            }
        }
    }

    if prepared.is_empty() {
        return (Vec::new(), errors);
    }

    let views: Vec<_> = prepared.iter().map(|(_, tensor)| tensor.view()).collect();
    let outcomes = ndarray::concatenate(Axis(0), &views)
        .map_err(|e| AgrivError::inference(format!("Failed to stack batch: {e}")))
        .and_then(|batch| registry.predict_batch(model_name, batch.view()));

    let outcomes = match outcomes {
        Ok(outcomes) => outcomes,
        Err(e) => {
            errors.extend(prepared.into_iter().map(|(filename, _)| BatchError {
                filename,
                error: e.to_string(),
            }));
            return (Vec::new(), errors);
        }
    };

    let mut results = Vec::new();
    for ((filename, _), outcome) in prepared.into_iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(PredictResponse::new(result, filename)),
            Err(e) => {
                warn!(filename = %filename, error = %e, "Prediction failed");
                errors.push(BatchError {
                    filename,
                    error: e.to_string(),
                });
            }
        }
    }

    (results, errors)
}
