use super::types::{ElementKind, InferenceBackend, ModelDescriptor, RawOutput, TensorDescriptor};
use crate::error::{Result, SegmentationError};
use ndarray::ArrayView4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{TensorRef, ValueType};
use parking_lot::Mutex;
use std::path::Path;

/// ONNX Runtime inference backend
///
/// The session is locked for the duration of a run, so concurrent requests
/// from the pipeline's workers are serialized here. Intra-op threads still
/// parallelize each run.
pub struct OnnxBackend {
    session: Mutex<Session>,
    inputs: Vec<TensorDescriptor>,
    outputs: Vec<TensorDescriptor>,
}

impl OnnxBackend {
    /// Load a segmentation model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `intra_threads` - Threads used inside a single inference run
    /// * `device_id` - GPU id for the CUDA / TensorRT providers when enabled
    pub fn new<P: AsRef<Path>>(model_path: P, intra_threads: usize, device_id: i32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading ONNX model from {}", path.display());

        let builder = Session::builder()
            .map_err(|e| backend_error("session builder initialization", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| backend_error("optimization level setup", e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| backend_error("intra thread setup", e))?;
        let builder = with_gpu_providers(builder, device_id)?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| backend_error(&format!("model load: {}", path.display()), e))?;

        let inputs = session
            .inputs
            .iter()
            .map(|input| describe(&input.name, &input.input_type))
            .collect();
        let outputs = session
            .outputs
            .iter()
            .map(|output| describe(&output.name, &output.output_type))
            .collect();

        tracing::info!("ONNX model loaded successfully");
        tracing::debug!("Model inputs: {:?}", inputs);
        tracing::debug!("Model outputs: {:?}", outputs);

        Ok(Self {
            session: Mutex::new(session),
            inputs,
            outputs,
        })
    }
}

#[cfg(any(feature = "cuda", feature = "tensorrt"))]
fn with_gpu_providers(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder> {
    let mut providers = Vec::new();
    #[cfg(feature = "tensorrt")]
    providers.push(
        ort::execution_providers::TensorRTExecutionProvider::default()
            .with_device_id(device_id)
            .build(),
    );
    #[cfg(feature = "cuda")]
    providers.push(
        ort::execution_providers::CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build(),
    );

    tracing::info!("Registering {} GPU execution provider(s) on device {}", providers.len(), device_id);
    builder
        .with_execution_providers(providers)
        .map_err(|e| backend_error("execution provider setup", e))
}

#[cfg(not(any(feature = "cuda", feature = "tensorrt")))]
fn with_gpu_providers(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder> {
    tracing::debug!("GPU providers not compiled in, ignoring device {}", device_id);
    Ok(builder)
}

impl ModelDescriptor for OnnxBackend {
    fn input_descriptors(&self) -> Vec<TensorDescriptor> {
        self.inputs.clone()
    }

    fn output_descriptors(&self) -> Vec<TensorDescriptor> {
        self.outputs.clone()
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: ArrayView4<f32>) -> Result<RawOutput> {
        let _span = tracing::debug_span!("inference").entered();

        let (input_desc, output_desc) = match (self.inputs.first(), self.outputs.first()) {
            (Some(input), Some(output)) => (input, output),
            _ => {
                return Err(SegmentationError::configuration(
                    "model has no input or no output",
                ))
            }
        };

        let input = input.as_standard_layout();
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            input_desc.name.as_str() => TensorRef::from_array_view(&input)?
        ])?;
        let output = &outputs[output_desc.name.as_str()];

        let raw = match output_desc.element {
            ElementKind::Float32 => {
                RawOutput::Float(output.try_extract_array::<f32>()?.iter().copied().collect())
            }
            ElementKind::Int32 => RawOutput::Int(
                output
                    .try_extract_array::<i32>()?
                    .iter()
                    .map(|&v| v as i64)
                    .collect(),
            ),
            ElementKind::Int64 => {
                RawOutput::Int(output.try_extract_array::<i64>()?.iter().copied().collect())
            }
            ElementKind::Unsupported(ref name) => {
                return Err(SegmentationError::configuration(format!(
                    "cannot read output '{}' of type {}",
                    output_desc.name, name
                )))
            }
        };

        Ok(raw)
    }
}

fn describe(name: &str, value_type: &ValueType) -> TensorDescriptor {
    let dims = value_type
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
        .unwrap_or_default();
    let element = match value_type.tensor_type() {
        Some(TensorElementType::Float32) => ElementKind::Float32,
        Some(TensorElementType::Int32) => ElementKind::Int32,
        Some(TensorElementType::Int64) => ElementKind::Int64,
        Some(other) => ElementKind::Unsupported(format!("{:?}", other)),
        None => ElementKind::Unsupported("non-tensor value".to_string()),
    };
    TensorDescriptor::new(name, dims, element)
}

fn backend_error(operation: &str, err: impl std::fmt::Display) -> SegmentationError {
    SegmentationError::Backend {
        operation: operation.to_string(),
        source: err.to_string().into(),
    }
}
