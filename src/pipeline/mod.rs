mod async_pipeline;
pub mod metrics;

pub use async_pipeline::{AsyncPipeline, RequestResult};
pub use metrics::PerformanceMetrics;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::segmentation::{
    bind_input, bind_output, ColorPalette, InferenceBackend, InputBinding, OutputBinding,
    Preprocessor, SegmentationPostprocessor, SegmentationResult,
};
use image::RgbImage;
use std::sync::Arc;

/// Semantic segmentation on top of the async request pool
///
/// Construction binds the model input and output and builds the class
/// palette, so every check that can fail on a bad model happens before the
/// first frame is submitted.
pub struct SegmentationPipeline<B: InferenceBackend + 'static, T: Send + 'static> {
    pipeline: AsyncPipeline<B, T>,
    postprocessor: SegmentationPostprocessor,
    input: InputBinding,
    output: OutputBinding,
    metrics: PerformanceMetrics,
}

impl<B: InferenceBackend + 'static, T: Send + 'static> SegmentationPipeline<B, T> {
    pub fn new(backend: B, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let (input, output) = Self::prepare_inputs_outputs(&backend)?;
        let palette = Arc::new(ColorPalette::new(config.palette_size, config.palette_seed));
        let postprocessor = SegmentationPostprocessor::new(output.geometry, palette);

        let preprocessor = Preprocessor::new(input.width, input.height)
            .with_scale(config.input_scale)
            .with_bgr(config.input_bgr);
        let pipeline = AsyncPipeline::new(Arc::new(backend), preprocessor, config.num_requests)?;

        Ok(Self {
            pipeline,
            postprocessor,
            input,
            output,
            metrics: PerformanceMetrics::default(),
        })
    }

    /// Bind the model's single input and output
    pub fn prepare_inputs_outputs(backend: &B) -> Result<(InputBinding, OutputBinding)> {
        let input = bind_input(backend)?;
        let output = bind_output(backend)?;
        Ok((input, output))
    }

    pub fn input_binding(&self) -> &InputBinding {
        &self.input
    }

    pub fn output_binding(&self) -> &OutputBinding {
        &self.output
    }

    pub fn palette(&self) -> &ColorPalette {
        self.postprocessor.palette()
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn is_ready_to_process(&self) -> bool {
        self.pipeline.is_ready_to_process()
    }

    /// Submit a frame; see [`AsyncPipeline::submit`]
    pub fn submit_data(&self, frame: &RgbImage, extra_data: T) -> Result<Option<u64>> {
        self.pipeline.submit(frame, extra_data)
    }

    pub fn wait_for_data(&self) {
        self.pipeline.wait_for_data()
    }

    pub fn wait_for_total_completion(&self) {
        self.pipeline.wait_for_total_completion()
    }

    pub fn has_completed_request(&self) -> bool {
        self.pipeline.has_completed_request()
    }

    /// Next finished frame in submission order, post-processed at the size of
    /// the frame that was submitted
    ///
    /// Returns `Ok(None)` when the next frame is still running.
    pub fn get_processed_result(&mut self) -> Result<Option<SegmentationResult<T>>> {
        let request = match self.pipeline.get_result() {
            Some(request) => request?,
            None => return Ok(None),
        };

        let (width, height) = request.frame_size;
        let result = self.postprocessor.process(
            request.frame_id,
            &request.output,
            width,
            height,
            request.extra_data,
        )?;
        self.metrics.update(request.started);

        Ok(Some(result))
    }

    /// Mask of the next finished frame, unchanged
    pub fn obtain_and_render_data(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.get_processed_result()?.map(SegmentationResult::into_mask))
    }
}
