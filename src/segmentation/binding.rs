use super::types::{ElementKind, ModelDescriptor, TensorDescriptor};
use crate::error::{Result, SegmentationError};

/// Shape of the model output, channel-first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    pub height: usize,
    pub width: usize,
    /// 1 for class-index maps, the class count for score maps
    pub channels: usize,
}

impl OutputGeometry {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    pub fn element_count(&self) -> usize {
        self.plane_len() * self.channels
    }

    /// True when each output value is already a class id
    pub fn is_class_map(&self) -> bool {
        self.channels == 1
    }

    /// Output size as (width, height), matching `image` conventions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub name: String,
    pub geometry: OutputGeometry,
    pub element: ElementKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// Record the geometry of the model's single output
///
/// Accepted layouts are `[H, W]`, `[C, H, W]` and `[1, C, H, W]`.
pub fn bind_output(model: &(impl ModelDescriptor + ?Sized)) -> Result<OutputBinding> {
    let outputs = model.output_descriptors();
    let output = match outputs.as_slice() {
        [single] => single,
        _ => {
            return Err(SegmentationError::configuration(format!(
                "segmentation model must have exactly one output, found {}",
                outputs.len()
            )))
        }
    };

    match output.element {
        ElementKind::Float32 | ElementKind::Int32 | ElementKind::Int64 => {}
        ElementKind::Unsupported(ref name) => {
            return Err(SegmentationError::configuration(format!(
                "output '{}' has unsupported element type {}",
                output.name, name
            )))
        }
    }

    let dims = static_dims(output)?;
    let (channels, height, width) = match dims.as_slice() {
        [h, w] => (1, *h, *w),
        [c, h, w] => (*c, *h, *w),
        [1, c, h, w] => (*c, *h, *w),
        [n, _, _, _] => {
            return Err(SegmentationError::configuration(format!(
                "output '{}' has batch size {}, only 1 is supported",
                output.name, n
            )))
        }
        other => {
            return Err(SegmentationError::configuration(format!(
                "output '{}' has unsupported rank {} (expected 2, 3 or 4)",
                output.name,
                other.len()
            )))
        }
    };

    if height
        .checked_mul(width)
        .and_then(|plane| plane.checked_mul(channels))
        .is_none()
    {
        return Err(SegmentationError::configuration(format!(
            "output '{}' of {}x{}x{} values is too large to address",
            output.name, channels, height, width
        )));
    }

    let geometry = OutputGeometry::new(height, width, channels);
    tracing::info!(
        "Bound output '{}': {}x{} with {} channel(s) ({:?})",
        output.name,
        width,
        height,
        channels,
        output.element
    );

    Ok(OutputBinding {
        name: output.name.clone(),
        geometry,
        element: output.element.clone(),
    })
}

/// Record the size of the model's single image input (`[1, 3, H, W]`, `f32`)
pub fn bind_input(model: &(impl ModelDescriptor + ?Sized)) -> Result<InputBinding> {
    let inputs = model.input_descriptors();
    let input = match inputs.as_slice() {
        [single] => single,
        _ => {
            return Err(SegmentationError::configuration(format!(
                "segmentation model must have exactly one input, found {}",
                inputs.len()
            )))
        }
    };

    if input.element != ElementKind::Float32 {
        return Err(SegmentationError::configuration(format!(
            "input '{}' must be f32, found {:?}",
            input.name, input.element
        )));
    }

    let dims = static_dims(input)?;
    let (height, width) = match dims.as_slice() {
        [1, 3, h, w] => (*h, *w),
        other => {
            return Err(SegmentationError::configuration(format!(
                "input '{}' must be [1, 3, H, W], found {:?}",
                input.name, other
            )))
        }
    };

    tracing::info!("Bound input '{}': {}x{}", input.name, width, height);

    Ok(InputBinding {
        name: input.name.clone(),
        width: width as u32,
        height: height as u32,
    })
}

/// Positive dimensions that fit `u32`, the limit of `image` buffers
fn static_dims(tensor: &TensorDescriptor) -> Result<Vec<usize>> {
    tensor
        .dims
        .iter()
        .map(|&d| {
            if d <= 0 {
                return Err(SegmentationError::configuration(format!(
                    "tensor '{}' has dynamic or empty dimension in {:?}",
                    tensor.name, tensor.dims
                )));
            }
            u32::try_from(d).map(|d| d as usize).map_err(|_| {
                SegmentationError::configuration(format!(
                    "tensor '{}' has dimension {} larger than {}",
                    tensor.name,
                    d,
                    u32::MAX
                ))
            })
        })
        .collect()
}
