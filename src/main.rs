use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use segmask::capture::{CaptureSource, ImageFolderSource, WebcamCapture};
use segmask::output::{blend, ImageFileSink, OutputSink, V4L2Output};
use segmask::segmentation::{InferenceBackend, OnnxBackend};
use segmask::{PipelineConfig, SegmentationPipeline};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the segmentation model (ONNX file)
    #[arg(short, long)]
    model: PathBuf,

    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Read frames from the images under this directory instead of a webcam
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Start over when the input directory is exhausted
    #[arg(long)]
    loop_input: bool,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Write rendered frames as PNG files to this directory instead of a v4l2 device
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output resolution width (v4l2 output only)
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height (v4l2 output only)
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Number of inference requests kept in flight
    #[arg(short = 'n', long, default_value_t = 2)]
    nireq: usize,

    /// Seed for class colors
    #[arg(long, default_value_t = 5489)]
    seed: u64,

    /// Number of precomputed class colors
    #[arg(long, default_value_t = 256)]
    palette_size: usize,

    /// Blend the mask over the frame with this weight (0-1) instead of showing the bare mask
    #[arg(long)]
    blend: Option<f32>,

    /// Multiplier applied to 8-bit pixel values before inference
    #[arg(long, default_value_t = 1.0 / 255.0)]
    input_scale: f32,

    /// Feed channels to the model in BGR order
    #[arg(long)]
    bgr: bool,

    /// Threads used inside one inference run
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// GPU device id (with the cuda / tensorrt features)
    #[arg(long, default_value_t = 0)]
    device_id: i32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            num_requests: self.nireq,
            palette_seed: self.seed,
            palette_size: self.palette_size,
            input_scale: self.input_scale,
            input_bgr: self.bgr,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("segmask starting");

    if let Some(alpha) = args.blend {
        anyhow::ensure!(
            (0.0..=1.0).contains(&alpha),
            "--blend must be within [0, 1], got {}",
            alpha
        );
    }

    let mut capture: Box<dyn CaptureSource> = match &args.input_dir {
        Some(dir) => Box::new(
            ImageFolderSource::new(dir, args.loop_input)
                .context("Failed to open input directory")?,
        ),
        None => Box::new(
            WebcamCapture::new(args.input_device, args.capture_width, args.capture_height)
                .context("Failed to initialize webcam capture")?,
        ),
    };

    let mut output: Box<dyn OutputSink> = match &args.output_dir {
        Some(dir) => Box::new(ImageFileSink::new(dir).context("Failed to prepare output directory")?),
        None => Box::new(
            V4L2Output::new(&args.output_device, args.output_width, args.output_height)
                .context("Failed to initialize v4l2loopback output")?,
        ),
    };

    let backend = OnnxBackend::new(&args.model, args.threads, args.device_id)
        .context("Failed to load segmentation model")?;
    let mut pipeline = SegmentationPipeline::new(backend, &args.pipeline_config())
        .context("Model is not usable for segmentation")?;

    tracing::info!("Input: {}", capture.describe());
    tracing::info!("Output: {}", output.describe());

    run_pipeline(capture.as_mut(), output.as_mut(), &mut pipeline, args.blend)?;

    Ok(())
}

/// Keep every request slot busy, render results as they arrive in order
fn run_pipeline<B: InferenceBackend + 'static>(
    capture: &mut dyn CaptureSource,
    output: &mut dyn OutputSink,
    pipeline: &mut SegmentationPipeline<B, RgbImage>,
    blend_alpha: Option<f32>,
) -> Result<()> {
    tracing::info!("Starting main pipeline loop");

    let mut exhausted = false;
    while !exhausted {
        while !exhausted && pipeline.is_ready_to_process() {
            match capture.capture_frame().context("Failed to capture frame")? {
                Some(frame) => {
                    // The original frame rides along for blending
                    pipeline
                        .submit_data(&frame, frame.clone())
                        .context("Failed to submit frame")?;
                }
                None => {
                    tracing::info!("Input exhausted");
                    exhausted = true;
                }
            }
        }

        pipeline.wait_for_data();
        render_ready(pipeline, output, blend_alpha)?;
    }

    pipeline.wait_for_total_completion();
    render_ready(pipeline, output, blend_alpha)?;
    pipeline.metrics().log_summary();

    Ok(())
}

fn render_ready<B: InferenceBackend + 'static>(
    pipeline: &mut SegmentationPipeline<B, RgbImage>,
    output: &mut dyn OutputSink,
    blend_alpha: Option<f32>,
) -> Result<()> {
    loop {
        let result = match pipeline.get_processed_result() {
            Ok(Some(result)) => result,
            Ok(None) => return Ok(()),
            Err(err) => {
                tracing::warn!("Skipping frame: {:#}", anyhow::Error::from(err));
                continue;
            }
        };

        let (frame_id, mask, frame) = result.into_parts();
        let rendered = match blend_alpha {
            Some(alpha) => blend(&frame, &mask, alpha)?,
            None => mask,
        };
        output
            .write_frame(frame_id, &rendered)
            .context("Failed to write frame")?;
    }
}
