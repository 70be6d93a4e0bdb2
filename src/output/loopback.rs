use super::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

/// Rendered frames pushed into a v4l2loopback device as YUYV
pub struct V4L2Output {
    // Held open so the negotiated format stays in place
    _device: Device,
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let mut format = Output::format(&device).context("Failed to query output format")?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YUYV");
        let format = Output::set_format(&device, &format).context("Failed to set output format")?;
        tracing::debug!(
            "Negotiated loopback format: {}x{} {}",
            format.width,
            format.height,
            format.fourcc
        );

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            _device: device,
            file,
            width: format.width,
            height: format.height,
        })
    }

    /// Pack an RGB frame as YUYV (4:2:2), chroma averaged over pixel pairs
    fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
        let (width, height) = rgb_image.dimensions();
        let mut yuyv = Vec::with_capacity((width.div_ceil(2) * 4 * height) as usize);

        for row in rgb_image.rows() {
            let row: Vec<_> = row.collect();
            for pair in row.chunks(2) {
                let left = pair[0];
                // Odd widths repeat the last pixel
                let right = pair.get(1).copied().unwrap_or(left);

                let (y0, u0, v0) = rgb_to_yuv(left[0], left[1], left[2]);
                let (y1, u1, v1) = rgb_to_yuv(right[0], right[1], right[2]);

                yuyv.extend_from_slice(&[
                    y0,
                    ((u0 as u16 + u1 as u16) / 2) as u8,
                    y1,
                    ((v0 as u16 + v1 as u16) / 2) as u8,
                ]);
            }
        }

        yuyv
    }
}

/// BT.601 RGB to YUV
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;

    (
        to_u8(0.299 * r + 0.587 * g + 0.114 * b),
        to_u8(-0.147 * r - 0.289 * g + 0.436 * b + 128.0),
        to_u8(0.615 * r - 0.515 * g - 0.100 * b + 128.0),
    )
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, _frame_id: u64, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            // Masks are already colorized here, so nearest keeps class edges crisp
            resized = imageops::resize(frame, self.width, self.height, imageops::FilterType::Nearest);
            &resized
        } else {
            frame
        };

        let yuyv_data = Self::rgb_to_yuyv(frame);

        self.file
            .write_all(&yuyv_data)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn describe(&self) -> String {
        format!("v4l2loopback {}x{}", self.width, self.height)
    }
}
