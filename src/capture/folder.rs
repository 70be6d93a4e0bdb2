use super::CaptureSource;
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// Frames read from the image files under a directory, in path order
pub struct ImageFolderSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    looping: bool,
}

impl ImageFolderSource {
    pub fn new<P: AsRef<Path>>(root: P, looping: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry
                .with_context(|| format!("Failed to walk {}", root.display()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        anyhow::ensure!(
            !files.is_empty(),
            "No image files found under {}",
            root.display()
        );
        tracing::info!("Found {} image(s) under {}", files.len(), root.display());

        Ok(Self {
            root,
            files,
            position: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl CaptureSource for ImageFolderSource {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;

        let image = image::open(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tracing::debug!("Read {}", path.display());

        Ok(Some(image.to_rgb8()))
    }

    fn describe(&self) -> String {
        format!("image folder {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_reads_images_in_order() -> Result<()> {
        let dir = TempDir::new()?;
        RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])).save(dir.path().join("b.png"))?;
        RgbImage::from_pixel(5, 4, Rgb([4, 5, 6])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"skip me")?;

        let mut source = ImageFolderSource::new(dir.path(), false)?;
        assert_eq!(source.len(), 2);

        let first = source.capture_frame()?.unwrap();
        assert_eq!(first.dimensions(), (5, 4));
        let second = source.capture_frame()?.unwrap();
        assert_eq!(*second.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert!(source.capture_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn test_looping_restarts() -> Result<()> {
        let dir = TempDir::new()?;
        RgbImage::new(2, 2).save(dir.path().join("only.png"))?;

        let mut source = ImageFolderSource::new(dir.path(), true)?;
        for _ in 0..3 {
            assert!(source.capture_frame()?.is_some());
        }
        Ok(())
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(ImageFolderSource::new(dir.path(), false).is_err());
    }
}
