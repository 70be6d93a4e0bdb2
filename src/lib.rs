//! Asynchronous semantic segmentation with colorized class masks.
//!
//! Frames go through [`pipeline::SegmentationPipeline`], which keeps a fixed
//! number of inference requests in flight on an [`segmentation::InferenceBackend`]
//! and turns each finished request into a [`segmentation::SegmentationResult`]:
//! the frame id, an RGB mask at the frame's size and caller data.

pub mod capture;
pub mod config;
pub mod error;
pub mod mocks;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use config::PipelineConfig;
pub use error::{Result, SegmentationError};
pub use pipeline::SegmentationPipeline;
pub use segmentation::SegmentationResult;
