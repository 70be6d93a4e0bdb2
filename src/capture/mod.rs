mod folder;
mod v4l_capture;

pub use folder::ImageFolderSource;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Trait for frame sources feeding the pipeline
pub trait CaptureSource {
    /// Capture the next frame, `None` once the source is exhausted
    fn capture_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Human readable description for logging
    fn describe(&self) -> String;
}
