use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes every rendered frame as `frame_<id>.png` into a directory
pub struct ImageFileSink {
    dir: PathBuf,
}

impl ImageFileSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        tracing::info!("Writing rendered frames to {}", dir.display());
        Ok(Self { dir })
    }

    pub fn frame_path(&self, frame_id: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", frame_id))
    }
}

impl OutputSink for ImageFileSink {
    fn write_frame(&mut self, frame_id: u64, frame: &RgbImage) -> Result<()> {
        let path = self.frame_path(frame_id);
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_writes_numbered_png() -> Result<()> {
        let dir = TempDir::new()?;
        let mut sink = ImageFileSink::new(dir.path().join("out"))?;

        let frame = RgbImage::from_pixel(3, 3, Rgb([9, 8, 7]));
        sink.write_frame(12, &frame)?;

        let written = image::open(dir.path().join("out/frame_000012.png"))?.to_rgb8();
        assert_eq!(written, frame);
        Ok(())
    }
}
