use anyhow::{ensure, Result};
use image::{Rgb, RgbImage};

/// Mix a class mask over its source frame
///
/// `alpha` is the weight of the mask: 0.0 keeps the frame, 1.0 shows only the
/// mask.
pub fn blend(frame: &RgbImage, mask: &RgbImage, alpha: f32) -> Result<RgbImage> {
    ensure!(
        frame.dimensions() == mask.dimensions(),
        "Frame {:?} and mask {:?} dimensions do not match",
        frame.dimensions(),
        mask.dimensions()
    );
    ensure!(
        (0.0..=1.0).contains(&alpha),
        "Blend alpha must be within [0, 1], got {}",
        alpha
    );

    let (width, height) = frame.dimensions();
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let f = frame.get_pixel(x, y);
        let m = mask.get_pixel(x, y);
        let mix = |a: u8, b: u8| (a as f32 * (1.0 - alpha) + b as f32 * alpha).round() as u8;
        Rgb([mix(f[0], m[0]), mix(f[1], m[1]), mix(f[2], m[2])])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_weights() {
        let frame = RgbImage::from_pixel(2, 2, Rgb([200, 0, 100]));
        let mask = RgbImage::from_pixel(2, 2, Rgb([0, 100, 100]));

        assert_eq!(blend(&frame, &mask, 0.0).unwrap(), frame);
        assert_eq!(blend(&frame, &mask, 1.0).unwrap(), mask);
        assert_eq!(*blend(&frame, &mask, 0.5).unwrap().get_pixel(1, 1), Rgb([100, 50, 100]));
    }

    #[test]
    fn test_blend_rejects_bad_input() {
        let frame = RgbImage::new(2, 2);
        assert!(blend(&frame, &RgbImage::new(3, 2), 0.5).is_err());
        assert!(blend(&frame, &RgbImage::new(2, 2), 1.5).is_err());
    }
}
