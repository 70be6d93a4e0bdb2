use crate::error::Result;
use image::RgbImage;
use ndarray::ArrayView4;

/// Element type of a model tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Float32,
    Int32,
    Int64,
    /// Anything the pipeline cannot interpret, kept by name for error messages
    Unsupported(String),
}

/// Declared shape and type of one model input or output
///
/// Dimensions follow the backend's convention: a negative value marks a
/// dynamic (symbolic) dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub name: String,
    pub dims: Vec<i64>,
    pub element: ElementKind,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, dims: Vec<i64>, element: ElementKind) -> Self {
        Self {
            name: name.into(),
            dims,
            element,
        }
    }
}

/// Anything that can describe the tensors of a loaded model
///
/// Used once at setup to bind input and output geometry, so shape discovery
/// does not depend on a particular inference engine.
pub trait ModelDescriptor {
    fn input_descriptors(&self) -> Vec<TensorDescriptor>;

    fn output_descriptors(&self) -> Vec<TensorDescriptor>;
}

/// Flat output buffer of one inference request, row-major in the bound layout
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Float(Vec<f32>),
    Int(Vec<i64>),
}

impl RawOutput {
    pub fn len(&self) -> usize {
        match self {
            RawOutput::Float(values) => values.len(),
            RawOutput::Int(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inference engine seam
///
/// Implementations run one request synchronously; the async pipeline calls
/// `infer` from its worker threads, hence `Send + Sync`.
pub trait InferenceBackend: ModelDescriptor + Send + Sync {
    /// Run the model on an NCHW input tensor and return the single output
    fn infer(&self, input: ArrayView4<f32>) -> Result<RawOutput>;
}

/// One processed frame: its id, the colorized class mask and caller data
#[derive(Debug, Clone)]
pub struct SegmentationResult<T> {
    frame_id: u64,
    mask: RgbImage,
    extra_data: T,
}

impl<T> SegmentationResult<T> {
    pub fn new(frame_id: u64, mask: RgbImage, extra_data: T) -> Self {
        Self {
            frame_id,
            mask,
            extra_data,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn mask(&self) -> &RgbImage {
        &self.mask
    }

    pub fn extra_data(&self) -> &T {
        &self.extra_data
    }

    pub fn into_mask(self) -> RgbImage {
        self.mask
    }

    pub fn into_parts(self) -> (u64, RgbImage, T) {
        (self.frame_id, self.mask, self.extra_data)
    }
}
