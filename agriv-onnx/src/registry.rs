//! Multi-model inference registry
//!
//! The registry is built once from a [`ModelCatalog`] and is read-only
//! afterwards. It owns every loaded backend, adapts the channels-last
//! tensors produced by [`crate::preprocess`] to each model's declared layout,
//! and turns raw model output into a labeled probability distribution.

use crate::error::{AgrivError, AgrivResult};
use crate::model::{ModelCatalog, ModelDescriptor};
use crate::runtime::inference::OnnxBackend;
use crate::runtime::{to_f32_tensor, ExecutionBackend, TensorElement, TensorInfo, TensorLayout};
use crate::Device;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ndarray::{s, ArrayD, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session settings applied to every model the registry loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOptions {
    pub device: Device,
    /// Enable all graph-level optimizations
    pub optimize: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            device: Device::default(),
            optimize: true,
        }
    }
}

/// A backend bound to the descriptor it was loaded from
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    backend: Box<dyn ExecutionBackend>,
    layout: TensorLayout,
    loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn input(&self) -> &TensorInfo {
        self.backend.input()
    }

    pub fn output(&self) -> &TensorInfo {
        self.backend.output()
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.descriptor.name.clone(),
            input_size: self.descriptor.input_size,
            classes: self.descriptor.classes.clone(),
            num_classes: self.descriptor.num_classes(),
            input: self.backend.input().clone(),
            output: self.backend.output().clone(),
            layout: self.layout,
            loaded_at: self.loaded_at,
        }
    }
}

/// Outcome of one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f32,
    /// Every class label, in descriptor order, with its probability
    pub class_probabilities: IndexMap<String, f32>,
    pub model_used: String,
}

/// Public metadata of a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub input_size: (u32, u32),
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub input: TensorInfo,
    pub output: TensorInfo,
    pub layout: TensorLayout,
    pub loaded_at: DateTime<Utc>,
}

/// Loaded models keyed by name
pub struct Registry {
    models: BTreeMap<String, LoadedModel>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.model_names())
            .finish()
    }
}

impl Registry {
    /// Load every catalog entry whose artifact exists with ONNX Runtime
    pub fn load(catalog: &ModelCatalog, options: &RegistryOptions) -> AgrivResult<Self> {
        Self::load_with(catalog, |descriptor| {
            let backend =
                OnnxBackend::new_with_device(&descriptor.storage_path, options.device, options.optimize)?;
            Ok(Box::new(backend) as Box<dyn ExecutionBackend>)
        })
    }

    /// Load the catalog using `loader` to build each backend.
    ///
    /// Entries whose artifact is missing are skipped. Any other load failure,
    /// or a class count that disagrees with the model's output, aborts the
    /// whole load. Loading nothing at all is [`AgrivError::NoModelsAvailable`].
    pub fn load_with<F>(catalog: &ModelCatalog, mut loader: F) -> AgrivResult<Self>
    where
        F: FnMut(&ModelDescriptor) -> AgrivResult<Box<dyn ExecutionBackend>>,
    {
        let mut models = BTreeMap::new();

        for descriptor in catalog.iter() {
            if !descriptor.artifact_exists() {
                log::warn!("Model file not found: {}", descriptor.storage_path.display());
                log::info!("Skipping {} model - file not found", descriptor.name);
                continue;
            }

            let backend = loader(descriptor).map_err(|e| match e {
                AgrivError::ModelLoad { .. } => e,
                other => AgrivError::model_load(&descriptor.name, other),
            })?;

            if let Some(actual) = backend.output().values_per_item() {
                if actual != descriptor.num_classes() {
                    return Err(AgrivError::ClassCountMismatch {
                        model: descriptor.name.clone(),
                        declared: descriptor.num_classes(),
                        actual,
                    });
                }
            }

            let layout = TensorLayout::from_declared_shape(&backend.input().shape);

            log::info!(
                "Loaded {} model from {}",
                descriptor.name,
                descriptor.storage_path.display()
            );
            log::info!(
                "   Input: {} {:?} ({:?})",
                backend.input().name,
                backend.input().shape,
                layout
            );
            log::info!("   Output: {} {:?}", backend.output().name, backend.output().shape);

            models.insert(
                descriptor.name.clone(),
                LoadedModel {
                    descriptor: descriptor.clone(),
                    backend,
                    layout,
                    loaded_at: Utc::now(),
                },
            );
        }

        if models.is_empty() {
            return Err(AgrivError::NoModelsAvailable);
        }

        let registry = Self { models };
        log::info!(
            "Loaded {} model(s): {:?}",
            registry.len(),
            registry.model_names()
        );
        Ok(registry)
    }

    fn get(&self, name: &str) -> AgrivResult<&LoadedModel> {
        self.models.get(name).ok_or_else(|| AgrivError::UnknownModel {
            name: name.to_string(),
            available: self.model_names(),
        })
    }

    /// Classify one channels-last `(1, H, W, 3)` tensor
    pub fn predict<T: TensorElement>(
        &self,
        model_name: &str,
        tensor: ArrayView4<'_, T>,
    ) -> AgrivResult<PredictionResult> {
        let model = self.get(model_name)?;

        if tensor.len_of(Axis(0)) != 1 {
            return Err(AgrivError::inference(format!(
                "Expected a batch of one, got shape {:?}",
                tensor.shape()
            )));
        }

        let input = model.layout.arrange(to_f32_tensor(tensor));
        if !model.input().accepts(input.shape()) {
            return Err(AgrivError::inference(format!(
                "Input shape {:?} does not match model input {:?}",
                input.shape(),
                model.input().shape
            )));
        }

        let output = model.backend.run(input).map_err(|e| match e {
            AgrivError::Inference(_) => e,
            other => AgrivError::inference(other.to_string()),
        })?;

        let result = postprocess(&model.descriptor, output)?;
        log::debug!(
            "Prediction: {} ({:.2}%)",
            result.predicted_class,
            result.confidence * 100.0
        );
        Ok(result)
    }

    /// Classify every item of an `(N, H, W, 3)` batch independently.
    ///
    /// Results keep input order; one item failing does not affect the others.
    pub fn predict_batch<T: TensorElement>(
        &self,
        model_name: &str,
        batch: ArrayView4<'_, T>,
    ) -> AgrivResult<Vec<AgrivResult<PredictionResult>>> {
        self.get(model_name)?;

        Ok((0..batch.len_of(Axis(0)))
            .map(|i| self.predict(model_name, batch.slice(s![i..i + 1, .., .., ..])))
            .collect())
    }

    /// Metadata for one model, or for all of them when `model_name` is `None`
    pub fn get_model_info(&self, model_name: Option<&str>) -> AgrivResult<BTreeMap<String, ModelInfo>> {
        match model_name {
            Some(name) => {
                let info = self.model_info(name)?;
                Ok(BTreeMap::from([(info.name.clone(), info)]))
            }
            None => Ok(self.all_model_info()),
        }
    }

    pub fn model_info(&self, model_name: &str) -> AgrivResult<ModelInfo> {
        self.get(model_name).map(LoadedModel::info)
    }

    pub fn all_model_info(&self) -> BTreeMap<String, ModelInfo> {
        self.models
            .iter()
            .map(|(name, model)| (name.clone(), model.info()))
            .collect()
    }

    /// Expected (height, width) of a model's input images
    pub fn input_size(&self, model_name: &str) -> AgrivResult<(u32, u32)> {
        self.get(model_name).map(|m| m.descriptor.input_size)
    }

    pub fn model(&self, model_name: &str) -> Option<&LoadedModel> {
        self.models.get(model_name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.models.contains_key(model_name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        log::info!("Releasing {} model(s)", self.models.len());
    }
}

fn postprocess(descriptor: &ModelDescriptor, output: ArrayD<f32>) -> AgrivResult<PredictionResult> {
    if output.ndim() < 2 || output.len_of(Axis(0)) == 0 {
        return Err(AgrivError::inference(format!(
            "Model output has no batch row, shape {:?}",
            output.shape()
        )));
    }

    let row = output.index_axis(Axis(0), 0);
    let probabilities = if row.ndim() == 1 {
        let scores: Vec<f32> = row.iter().copied().collect();
        softmax(&scores)
    } else {
        row.iter().copied().collect()
    };

    if probabilities.len() != descriptor.num_classes() {
        return Err(AgrivError::inference(format!(
            "Model '{}' produced {} scores for {} classes",
            descriptor.name,
            probabilities.len(),
            descriptor.num_classes()
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(AgrivError::inference(format!(
            "Model '{}' produced non-finite scores",
            descriptor.name
        )));
    }

    let predicted = argmax(&probabilities)
        .ok_or_else(|| AgrivError::inference("Model produced no scores"))?;

    let class_probabilities = descriptor
        .classes
        .iter()
        .cloned()
        .zip(probabilities.iter().copied())
        .collect();

    Ok(PredictionResult {
        predicted_class: descriptor.classes[predicted].clone(),
        confidence: probabilities[predicted],
        class_probabilities,
        model_used: descriptor.name.clone(),
    })
}

/// Numerically stable softmax
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; ties go to the first occurrence
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, max)) if v <= max => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
