use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::CaptureFormat;

/// Setup stage that failed while configuring a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    SetFormat,
    RequestBuffers,
    QueryBuffer,
    MapBuffer,
    StreamOn,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SetupStage::SetFormat => "set format",
            SetupStage::RequestBuffers => "request buffers",
            SetupStage::QueryBuffer => "query buffer",
            SetupStage::MapBuffer => "map buffer",
            SetupStage::StreamOn => "stream on",
        };
        f.write_str(name)
    }
}

/// Construction-time failures. None of these are recoverable: the session
/// that produced one is closed and must not be used.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("{stage} failed: {source}")]
    Setup { stage: SetupStage, source: io::Error },

    #[error("driver rejected {requested}, applied {applied}")]
    FormatRejected {
        requested: CaptureFormat,
        applied: CaptureFormat,
    },

    #[error("driver granted {0} buffers, exactly one is required")]
    BufferCount(u32),

    #[error("buffer length {length} is smaller than one frame ({required} bytes)")]
    BufferTooSmall { length: u32, required: usize },

    #[error("operation not valid while session is {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Geometry(#[from] ConvertError),
}

/// Failures of a single capture step.
#[derive(Debug, Error)]
pub enum StepError {
    /// The next step may succeed; the previous frame can be shown again.
    #[error("frame unavailable: {0}")]
    Transient(#[from] TransientCause),

    /// The device is gone or the handle is unusable; the session must be torn down.
    #[error("capture device failed: {0}")]
    Fatal(io::Error),

    #[error("capture cancelled")]
    Cancelled,

    #[error("capture step not valid while session is {0}")]
    InvalidState(&'static str),

    #[error("frame conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

#[derive(Debug, Error)]
pub enum TransientCause {
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("driver flagged the buffer as corrupt")]
    CorruptBuffer,

    #[error("short frame: {bytes_used} of {expected} bytes")]
    ShortFrame { bytes_used: u32, expected: usize },

    #[error("{0}")]
    Io(io::Error),
}

impl StepError {
    /// Splits driver errors into the retryable and the terminal ones.
    pub fn from_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EAGAIN | libc::EINTR | libc::EIO | libc::ETIMEDOUT) => {
                StepError::Transient(TransientCause::Io(err))
            }
            Some(_) => StepError::Fatal(err),
            None => match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                    StepError::Transient(TransientCause::Io(err))
                }
                _ => StepError::Fatal(err),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }
}

/// Raw buffer and frame geometry disagree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("width {0} is odd, YUYV packs pixels in pairs")]
    OddWidth(u32),

    #[error("raw buffer holds {actual} bytes, expected at least {expected}")]
    RawTooShort { actual: usize, expected: usize },

    #[error("output buffer holds {actual} bytes, expected {expected}")]
    OutputSize { actual: usize, expected: usize },
}
