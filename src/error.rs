use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid frame shape: {0}")]
    InvalidFrameShape(String),

    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode frame: {0}")]
    DecodeError(String),

    #[error("rgb buffer size mismatch: got {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("capture not ready: {0}")]
    CaptureNotReady(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("failed to bind camera session: {0}")]
    SessionBindError(String),

    #[error("engine call `{op}` failed: {reason}")]
    BoundaryCallFailed { op: &'static str, reason: String },

    #[error("camera permission denied")]
    PermissionDenied,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn boundary(op: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::BoundaryCallFailed {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
