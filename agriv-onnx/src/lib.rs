//! # agriv-onnx
//!
//! Multi-model image classification on ONNX Runtime.
//!
//! [`preprocess`] turns encoded image bytes into a channels-last f32 tensor,
//! and a [`Registry`] loaded once at startup routes a model name to the right
//! session, adapts the tensor layout, and returns a labeled prediction.

pub mod device;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod registry;
pub mod runtime;

// Re-exports
pub use device::{cpu, cpu_with_threads, Device};

#[cfg(feature = "cuda")]
pub use device::cuda;

pub use error::{AgrivError, AgrivResult};
pub use model::{ModelCatalog, ModelDescriptor};
pub use preprocess::{
    augment, decode_validated, image_to_tensor, preprocess, validate, Augmentation,
};
pub use registry::{
    argmax, softmax, LoadedModel, ModelInfo, PredictionResult, Registry, RegistryOptions,
};
pub use runtime::{
    inference::OnnxBackend, ExecutionBackend, TensorElement, TensorInfo,
    TensorLayout,
};
