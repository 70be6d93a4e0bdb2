mod files;
mod loopback;
mod overlay;

pub use files::ImageFileSink;
pub use loopback::V4L2Output;
pub use overlay::blend;

use anyhow::Result;
use image::RgbImage;

/// Trait for rendered frame destinations
pub trait OutputSink {
    /// Write a rendered frame
    fn write_frame(&mut self, frame_id: u64, frame: &RgbImage) -> Result<()>;

    /// Human readable description for logging
    fn describe(&self) -> String;
}
