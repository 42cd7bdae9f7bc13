//! ONNX Runtime backend

use crate::error::{AgrivError, AgrivResult};
use crate::runtime::{ExecutionBackend, TensorInfo};
use crate::Device;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};

use ort::execution_providers::ExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{Tensor, ValueType};

/// Loaded ONNX session plus its resolved input/output declarations
pub struct OnnxBackend {
    // `Session::run` needs exclusive access
    session: Mutex<Session>,
    input: TensorInfo,
    output: TensorInfo,
}

impl std::fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackend")
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl OnnxBackend {
    /// Load an ONNX artifact on a specific device
    pub fn new_with_device<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        optimize: bool,
    ) -> AgrivResult<Self> {
        let model_path = model_path.as_ref();

        if !device.is_available() {
            return Err(AgrivError::config(format!(
                "Device {device} is not available"
            )));
        }

        let mut builder = Session::builder()
            .map_err(|e| AgrivError::config(format!("Failed to create session builder: {e}")))?;

        match device {
            #[cfg(feature = "cuda")]
            Device::Cuda(id) => {
                use ort::execution_providers::CUDAExecutionProvider;
                let ep = CUDAExecutionProvider::default().with_device_id(id as i32);
                match ep.is_available() {
                    Ok(true) => {
                        ep.register(&mut builder).map_err(|e| {
                            AgrivError::config(format!("Failed to register CUDA: {e}"))
                        })?;
                    }
                    _ => return Err(AgrivError::config("CUDA execution provider not available")),
                }
            }
            Device::Cpu(_) => {
                use ort::execution_providers::CPUExecutionProvider;
                let ep = CPUExecutionProvider::default();
                ep.register(&mut builder)
                    .map_err(|e| AgrivError::config(format!("Failed to register CPU: {e}")))?;
            }
        }

        let level = if optimize {
            GraphOptimizationLevel::Level3
        } else {
            GraphOptimizationLevel::Disable
        };

        let session = builder
            .with_optimization_level(level)
            .map_err(|e| AgrivError::config(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(device.intra_threads())
            .map_err(|e| AgrivError::config(format!("Failed to set intra-op threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                AgrivError::config(format!(
                    "Failed to load ONNX model {}: {e}",
                    model_path.display()
                ))
            })?;

        Self::from_session(session)
    }

    /// Load an ONNX artifact on the CPU with all cores and full optimization
    pub fn new<P: AsRef<Path>>(model_path: P) -> AgrivResult<Self> {
        Self::new_with_device(model_path, crate::device::cpu(), true)
    }

    fn from_session(session: Session) -> AgrivResult<Self> {
        let input = session
            .inputs
            .first()
            .map(|i| TensorInfo::new(i.name.clone(), declared_shape(&i.input_type)))
            .ok_or_else(|| AgrivError::config("ONNX graph declares no inputs"))?;

        let output = session
            .outputs
            .first()
            .map(|o| TensorInfo::new(o.name.clone(), declared_shape(&o.output_type)))
            .ok_or_else(|| AgrivError::config("ONNX graph declares no outputs"))?;

        log::info!(
            "ONNX backend initialized with {} inputs and {} outputs",
            session.inputs.len(),
            session.outputs.len()
        );
        log::info!("  Input: name='{}', shape={:?}", input.name, input.shape);
        log::info!("  Output: name='{}', shape={:?}", output.name, output.shape);

        Ok(Self {
            session: Mutex::new(session),
            input,
            output,
        })
    }
}

fn declared_shape(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.to_vec(),
        _ => Vec::new(),
    }
}

impl ExecutionBackend for OnnxBackend {
    fn input(&self) -> &TensorInfo {
        &self.input
    }

    fn output(&self) -> &TensorInfo {
        &self.output
    }

    fn run(&self, input: ArrayD<f32>) -> AgrivResult<ArrayD<f32>> {
        let tensor = Tensor::from_array(input)
            .map_err(|e| AgrivError::inference(format!("Failed to create input tensor: {e}")))?;

        let mut onnx_inputs = HashMap::new();
        onnx_inputs.insert(self.input.name.clone(), tensor.into_dyn());

        let mut session = self
            .session
            .lock()
            .map_err(|_| AgrivError::inference("ONNX session lock poisoned"))?;

        let outputs = session
            .run(onnx_inputs)
            .map_err(|e| AgrivError::inference(format!("ONNX inference failed: {e}")))?;

        let value = outputs.get(self.output.name.as_str()).ok_or_else(|| {
            AgrivError::inference(format!("Missing output tensor '{}'", self.output.name))
        })?;

        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| AgrivError::inference(format!("Output is not an f32 tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| AgrivError::inference(format!("Malformed output tensor: {e}")))
    }
}
