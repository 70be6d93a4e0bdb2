mod binding;
mod onnx;
mod palette;
mod postprocess;
mod preprocess;
pub mod types;

pub use binding::{bind_input, bind_output, InputBinding, OutputBinding, OutputGeometry};
pub use onnx::OnnxBackend;
pub use palette::{ColorPalette, BACKGROUND};
pub use postprocess::{class_map, colorize, resize_nearest, ClassMap, SegmentationPostprocessor};
pub use preprocess::Preprocessor;
pub use types::{
    ElementKind, InferenceBackend, ModelDescriptor, RawOutput, SegmentationResult,
    TensorDescriptor,
};
