use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB frames to model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    scale: f32,
    bgr: bool,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            scale: 1.0 / 255.0,
            bgr: false,
        }
    }

    /// Multiplier applied to every 8-bit channel value
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Emit channels in B, G, R order
    pub fn with_bgr(mut self, bgr: bool) -> Self {
        self.bgr = bgr;
        self
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into an NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and scale
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let order: [usize; 3] = if self.bgr { [2, 1, 0] } else { [0, 1, 2] };

        for (x, y, pixel) in source.enumerate_pixels() {
            for (plane, &channel) in order.iter().enumerate() {
                tensor[[0, plane, y as usize, x as usize]] = pixel[channel] as f32 * self.scale;
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_shape_and_scaling() {
        let frame = RgbImage::from_pixel(10, 6, Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(8, 4).preprocess(&frame);

        assert_eq!(tensor.shape(), &[1, 3, 4, 8]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-2);
        assert!(tensor[[0, 1, 3, 7]].abs() < 1e-2);
        assert!((tensor[[0, 2, 2, 5]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn test_bgr_order_and_raw_scale() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let tensor = Preprocessor::new(2, 2)
            .with_bgr(true)
            .with_scale(1.0)
            .preprocess(&frame);

        assert_eq!(tensor[[0, 0, 1, 1]], 30.0);
        assert_eq!(tensor[[0, 1, 1, 1]], 20.0);
        assert_eq!(tensor[[0, 2, 1, 1]], 10.0);
    }
}
