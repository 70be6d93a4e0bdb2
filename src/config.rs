use crate::error::{Result, SegmentationError};

/// Library-side pipeline settings, filled from the command line in the binary
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Number of inference requests allowed in flight
    pub num_requests: usize,
    /// Seed for class colors
    pub palette_seed: u64,
    /// Number of precomputed class colors
    pub palette_size: usize,
    /// Multiplier applied to 8-bit pixel values before inference
    pub input_scale: f32,
    /// Feed channels to the model in BGR order
    pub input_bgr: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_requests: 2,
            palette_seed: 5489,
            palette_size: 256,
            input_scale: 1.0 / 255.0,
            input_bgr: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_requests == 0 {
            return Err(SegmentationError::configuration(
                "num_requests must be at least 1",
            ));
        }
        if !self.input_scale.is_finite() || self.input_scale <= 0.0 {
            return Err(SegmentationError::configuration(format!(
                "input_scale must be a positive number, got {}",
                self.input_scale
            )));
        }
        Ok(())
    }
}
