use super::binding::OutputGeometry;
use super::palette::ColorPalette;
use super::types::{RawOutput, SegmentationResult};
use crate::error::{Result, SegmentationError};
use image::{ImageBuffer, Luma, RgbImage};
use std::sync::Arc;

/// Per-pixel class ids
pub type ClassMap = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Turns raw model output into colorized class masks
///
/// Holds no per-frame state, so one instance can be shared between threads.
#[derive(Debug, Clone)]
pub struct SegmentationPostprocessor {
    geometry: OutputGeometry,
    palette: Arc<ColorPalette>,
}

impl SegmentationPostprocessor {
    pub fn new(geometry: OutputGeometry, palette: Arc<ColorPalette>) -> Self {
        Self { geometry, palette }
    }

    pub fn geometry(&self) -> OutputGeometry {
        self.geometry
    }

    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    /// Build the result for one finished request
    ///
    /// # Arguments
    /// * `frame_id` - Id assigned at submission
    /// * `raw` - Flat output buffer, `height * width * channels` values
    /// * `target_width`, `target_height` - Size of the original frame
    /// * `extra_data` - Carried through untouched
    pub fn process<T>(
        &self,
        frame_id: u64,
        raw: &RawOutput,
        target_width: u32,
        target_height: u32,
        extra_data: T,
    ) -> Result<SegmentationResult<T>> {
        let _span = tracing::debug_span!("postprocess", frame_id).entered();

        let classes = class_map(raw, self.geometry)?;
        let classes = resize_nearest(classes, target_width, target_height);
        let mask = colorize(&classes, &self.palette);

        Ok(SegmentationResult::new(frame_id, mask, extra_data))
    }
}

/// Decode the winning class of every output pixel
///
/// Single-channel outputs hold class ids directly. Multi-channel outputs hold
/// one score plane per class (NCHW); the highest score wins and ties go to
/// the lowest class index. NaN scores are rejected.
pub fn class_map(raw: &RawOutput, geometry: OutputGeometry) -> Result<ClassMap> {
    if raw.len() != geometry.element_count() {
        return Err(SegmentationError::contract_violation(format!(
            "output buffer has {} values, bound geometry {}x{}x{} needs {}",
            raw.len(),
            geometry.channels,
            geometry.height,
            geometry.width,
            geometry.element_count()
        )));
    }

    let ids = if geometry.is_class_map() {
        match raw {
            RawOutput::Float(values) => values
                .iter()
                .map(|&v| float_class_id(v))
                .collect::<Result<Vec<_>>>()?,
            RawOutput::Int(values) => values
                .iter()
                .map(|&v| int_class_id(v))
                .collect::<Result<Vec<_>>>()?,
        }
    } else {
        match raw {
            RawOutput::Float(values) => {
                if let Some(index) = values.iter().position(|v| v.is_nan()) {
                    return Err(SegmentationError::contract_violation(format!(
                        "NaN score at output index {}",
                        index
                    )));
                }
                argmax_planes(values, geometry)
            }
            RawOutput::Int(values) => argmax_planes(values, geometry),
        }
    };

    let (width, height) = geometry.dimensions();
    ImageBuffer::from_raw(width, height, ids).ok_or_else(|| {
        SegmentationError::contract_violation("class map does not fit output geometry")
    })
}

fn argmax_planes<V: PartialOrd + Copy>(values: &[V], geometry: OutputGeometry) -> Vec<u32> {
    let plane = geometry.plane_len();
    (0..plane)
        .map(|pixel| {
            let mut best = 0usize;
            let mut best_score = values[pixel];
            for channel in 1..geometry.channels {
                let score = values[channel * plane + pixel];
                // Strictly greater keeps the first maximum
                if score > best_score {
                    best = channel;
                    best_score = score;
                }
            }
            best as u32
        })
        .collect()
}

fn float_class_id(value: f32) -> Result<u32> {
    if !value.is_finite() || value < 0.0 || value >= u32::MAX as f32 {
        return Err(SegmentationError::contract_violation(format!(
            "invalid class id {} in output",
            value
        )));
    }
    Ok(value.trunc() as u32)
}

fn int_class_id(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        SegmentationError::contract_violation(format!("invalid class id {} in output", value))
    })
}

/// Resample a class map with nearest-neighbor lookup
///
/// Source index is `dst * src_len / dst_len`, so class ids are copied and
/// never mixed across boundaries. A map already at the target size is
/// returned as is.
pub fn resize_nearest(classes: ClassMap, width: u32, height: u32) -> ClassMap {
    let (src_width, src_height) = classes.dimensions();
    if (src_width, src_height) == (width, height) {
        return classes;
    }

    tracing::trace!(
        "Resizing class map {}x{} -> {}x{}",
        src_width,
        src_height,
        width,
        height
    );

    ImageBuffer::from_fn(width, height, |x, y| {
        let sx = (x as u64 * src_width as u64 / width as u64) as u32;
        let sy = (y as u64 * src_height as u64 / height as u64) as u32;
        *classes.get_pixel(sx.min(src_width - 1), sy.min(src_height - 1))
    })
}

pub fn colorize(classes: &ClassMap, palette: &ColorPalette) -> RgbImage {
    let (width, height) = classes.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        palette.color(classes.get_pixel(x, y)[0] as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postprocessor(geometry: OutputGeometry) -> SegmentationPostprocessor {
        SegmentationPostprocessor::new(geometry, Arc::new(ColorPalette::new(16, 1234)))
    }

    #[test]
    fn test_single_channel_colors_each_pixel() {
        let geometry = OutputGeometry::new(2, 3, 1);
        let values = vec![0, 1, 2, 3, 2, 1];
        let post = postprocessor(geometry);

        let result = post
            .process(7, &RawOutput::Int(values.clone()), 3, 2, ())
            .unwrap();

        assert_eq!(result.frame_id(), 7);
        assert_eq!(result.mask().dimensions(), (3, 2));
        for (i, class) in values.iter().enumerate() {
            let (x, y) = ((i % 3) as u32, (i / 3) as u32);
            assert_eq!(*result.mask().get_pixel(x, y), post.palette().color(*class as usize));
        }
    }

    #[test]
    fn test_float_class_ids_truncate() {
        let geometry = OutputGeometry::new(1, 3, 1);
        let classes = class_map(&RawOutput::Float(vec![0.0, 1.9, 4.2]), geometry).unwrap();
        assert_eq!(classes.into_raw(), vec![0, 1, 4]);
    }

    #[test]
    fn test_invalid_class_values() {
        let geometry = OutputGeometry::new(1, 2, 1);
        let negative = class_map(&RawOutput::Int(vec![0, -1]), geometry).unwrap_err();
        assert!(negative.is_contract_violation());

        let nan = class_map(&RawOutput::Float(vec![f32::NAN, 1.0]), geometry).unwrap_err();
        assert!(nan.is_contract_violation());
    }

    #[test]
    fn test_argmax_picks_highest_score() {
        // One pixel, three class planes
        let geometry = OutputGeometry::new(1, 1, 3);
        let classes = class_map(&RawOutput::Float(vec![0.2, 0.9, 0.1]), geometry).unwrap();
        assert_eq!(classes.get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn test_argmax_tie_goes_to_lowest_index() {
        let geometry = OutputGeometry::new(1, 1, 2);
        let classes = class_map(&RawOutput::Float(vec![0.5, 0.5]), geometry).unwrap();
        assert_eq!(classes.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_nan_score_is_rejected() {
        let geometry = OutputGeometry::new(1, 1, 2);
        for scores in [vec![f32::NAN, 0.9], vec![0.9, f32::NAN]] {
            let err = class_map(&RawOutput::Float(scores), geometry).unwrap_err();
            assert!(err.is_contract_violation());
        }
    }

    #[test]
    fn test_infinite_scores_still_compare() {
        let geometry = OutputGeometry::new(1, 1, 3);
        let classes =
            class_map(&RawOutput::Float(vec![f32::NEG_INFINITY, f32::INFINITY, 1.0]), geometry)
                .unwrap();
        assert_eq!(classes.get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn test_same_size_resize_is_unchanged() {
        let classes = ClassMap::from_raw(3, 1, vec![2, 0, 1]).unwrap();
        let resized = resize_nearest(classes.clone(), 3, 1);
        assert_eq!(resized, classes);
    }

    #[test]
    fn test_argmax_reads_channel_planes() {
        // 1x2 output, planes: class0 = [5, 0], class1 = [1, 3]
        let geometry = OutputGeometry::new(1, 2, 2);
        let classes = class_map(&RawOutput::Int(vec![5, 0, 1, 3]), geometry).unwrap();
        assert_eq!(classes.into_raw(), vec![0, 1]);
    }

    #[test]
    fn test_nearest_resize_keeps_hard_boundaries() {
        let classes = ClassMap::from_raw(2, 2, vec![0, 0, 1, 1]).unwrap();
        let resized = resize_nearest(classes, 4, 4);

        assert_eq!(
            resized.into_raw(),
            vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_nearest_downscale_picks_source_values() {
        let classes = ClassMap::from_raw(4, 1, vec![3, 5, 7, 9]).unwrap();
        let resized = resize_nearest(classes, 2, 1);
        assert_eq!(resized.into_raw(), vec![3, 7]);
    }

    #[test]
    fn test_resized_mask_only_uses_palette_colors() {
        let geometry = OutputGeometry::new(2, 2, 1);
        let post = postprocessor(geometry);
        let result = post
            .process(0, &RawOutput::Float(vec![0.0, 0.0, 1.0, 1.0]), 5, 7, "frame")
            .unwrap();

        let background = post.palette().color(0);
        let class_one = post.palette().color(1);
        assert_eq!(result.mask().dimensions(), (5, 7));
        assert!(result
            .mask()
            .pixels()
            .all(|p| *p == background || *p == class_one));
        assert_eq!(*result.extra_data(), "frame");
    }

    #[test]
    fn test_buffer_length_mismatch_is_fatal() {
        let geometry = OutputGeometry::new(2, 2, 3);
        let post = postprocessor(geometry);

        let short = post.process(1, &RawOutput::Float(vec![0.0; 11]), 2, 2, ());
        assert!(short.unwrap_err().is_contract_violation());

        let long = post.process(1, &RawOutput::Float(vec![0.0; 13]), 2, 2, ());
        assert!(long.unwrap_err().is_contract_violation());
    }
}
