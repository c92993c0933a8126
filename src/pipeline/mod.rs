//! Capture-and-convert producer, and the seams the host drives it through

pub mod runner;

use std::time::Instant;

use tracing::{instrument, warn};

use crate::capture::{
    AbortHandle, CaptureDevice, DeviceSession, FrameConverter, RgbFrame, SessionState,
};
use crate::error::{CaptureError, StepError};

pub use runner::{Flow, StepRunner};

/// Result of one successful or recoverable capture step.
#[derive(Debug)]
pub enum StepOutcome<'a> {
    /// A new frame was captured and converted.
    Captured(&'a RgbFrame),
    /// No new frame this step; the last good one is offered again, or a
    /// placeholder before anything was captured.
    Reused {
        previous: Option<&'a RgbFrame>,
        cause: StepError,
    },
}

/// Something the scheduler can ask for one frame.
pub trait FrameSource {
    /// Run one capture step to completion.
    ///
    /// `Err` is terminal: fatal device errors, cancellation, or a source
    /// that is not streaming.
    fn capture_step(&mut self) -> Result<StepOutcome<'_>, StepError>;

    fn abort_handle(&self) -> AbortHandle;
}

/// Display-side consumer of decoded frames.
pub trait FrameSink {
    /// Present `frame`. The frame is rewritten by the next step; copy it to
    /// keep it.
    fn present(&mut self, frame: &RgbFrame) -> color_eyre::Result<()>;
}

/// A streaming [`DeviceSession`] feeding a [`FrameConverter`].
pub struct CapturePipeline<D: CaptureDevice> {
    session: DeviceSession<D>,
    converter: FrameConverter,
    frame: RgbFrame,
    has_frame: bool,
}

impl<D: CaptureDevice> CapturePipeline<D> {
    /// Takes a configured or streaming session; starts streaming if needed.
    pub fn new(mut session: DeviceSession<D>) -> Result<Self, CaptureError> {
        if session.state() == SessionState::Configured {
            session.start_streaming()?;
        }
        if session.state() != SessionState::Streaming {
            return Err(CaptureError::InvalidState(session.state().name()));
        }

        let format = session.format();
        let converter = FrameConverter::new(format)?;
        Ok(Self {
            session,
            converter,
            frame: RgbFrame::placeholder(format.width, format.height),
            has_frame: false,
        })
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    pub fn last_frame(&self) -> Option<&RgbFrame> {
        self.has_frame.then_some(&self.frame)
    }

    /// Tear the session down. Dropping the pipeline does the same.
    pub fn close(mut self) {
        self.session.close();
    }
}

impl<D: CaptureDevice> FrameSource for CapturePipeline<D> {
    #[instrument(level = "trace", skip(self))]
    fn capture_step(&mut self) -> Result<StepOutcome<'_>, StepError> {
        match self.session.capture_step() {
            Ok((raw, dequeued)) => {
                let convert_start = Instant::now();
                self.converter.convert(raw, &mut self.frame.data)?;
                metrics::histogram!("camreader_convert_time_us")
                    .record(convert_start.elapsed().as_micros() as f64);
                metrics::counter!("camreader_frames_captured").increment(1);

                self.frame.sequence = dequeued.sequence;
                self.frame.captured_at = convert_start;
                self.has_frame = true;
                Ok(StepOutcome::Captured(&self.frame))
            }
            Err(cause) if cause.is_transient() => {
                metrics::counter!("camreader_transient_errors").increment(1);
                warn!("{}", cause);
                Ok(StepOutcome::Reused {
                    previous: Some(&self.frame),
                    cause,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        self.session.abort_handle()
    }
}
