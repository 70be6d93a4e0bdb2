use thiserror::Error;

/// Errors raised by the segmentation pipeline.
///
/// `Configuration` errors come from setup (model binding, invalid options) and
/// stop the pipeline before any frame is processed. `ContractViolation` errors
/// are raised per request when an output buffer does not match the bound model
/// geometry.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    #[error("Inference backend error: {operation} failed")]
    Backend {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Inference request for frame {frame_id} failed")]
    RequestFailed {
        frame_id: u64,
        #[source]
        source: Box<SegmentationError>,
    },

    #[error("Pipeline is shut down")]
    PipelineClosed,
}

pub type Result<T> = std::result::Result<T, SegmentationError>;

impl SegmentationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }
}

impl From<ort::Error> for SegmentationError {
    fn from(err: ort::Error) -> Self {
        Self::Backend {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}
