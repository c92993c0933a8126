//! Single-buffer streaming session over a [`CaptureDevice`]

use std::fmt;
use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::capture::device::{CaptureDevice, DeviceCapability};
use crate::capture::frame::{BufferDescriptor, CaptureFormat, DequeuedBuffer};
use crate::error::{CaptureError, SetupStage, StepError, TransientCause};

/// The only buffer a session ever uses
const BUFFER_INDEX: u32 = 0;

/// Longest uninterrupted wait before the abort flag is checked again
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opened,
    Configured,
    Streaming,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opened => "opened",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cancels in-progress and future capture steps. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owns one capture device and its single mapped buffer.
///
/// Lifecycle: `Opened` after [`new`](Self::new), `Configured` after
/// [`configure`](Self::configure), `Streaming` after
/// [`start_streaming`](Self::start_streaming), `Closed` after
/// [`close`](Self::close) or any setup failure. Dropping the session closes it.
pub struct DeviceSession<D: CaptureDevice> {
    device: Option<D>,
    name: String,
    format: CaptureFormat,
    capability: Option<DeviceCapability>,
    descriptor: Option<BufferDescriptor>,
    mapping: Option<D::Mapping>,
    state: SessionState,
    /// Buffer handed to the driver and not yet taken back
    in_flight: bool,
    dequeue_timeout: Duration,
    abort: AbortHandle,
}

impl<D: CaptureDevice> DeviceSession<D> {
    /// Wrap an opened device. The capability query is informational only and
    /// its failure is not an error.
    pub fn new(mut device: D, dequeue_timeout: Duration) -> Self {
        let name = device.name().to_string();
        let capability = match device.query_capability() {
            Ok(caps) => {
                info!(
                    "Device: {} ({}) on {}, capture={} streaming={}",
                    caps.card, caps.driver, caps.bus, caps.video_capture, caps.streaming
                );
                Some(caps)
            }
            Err(e) => {
                warn!("Capability query on {} failed: {}", name, e);
                None
            }
        };

        Self {
            device: Some(device),
            name,
            format: CaptureFormat::VGA_YUYV,
            capability,
            descriptor: None,
            mapping: None,
            state: SessionState::Opened,
            in_flight: false,
            dequeue_timeout,
            abort: AbortHandle::default(),
        }
    }

    /// [`new`](Self::new) followed by [`configure`](Self::configure).
    pub fn open(device: D, dequeue_timeout: Duration) -> Result<Self, CaptureError> {
        let mut session = Self::new(device, dequeue_timeout);
        session.configure()?;
        Ok(session)
    }

    /// Negotiate the capture format and set up the single mapped buffer.
    ///
    /// On failure everything acquired so far is released, the device is
    /// closed and the session moves to `Closed`.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn configure(&mut self) -> Result<(), CaptureError> {
        if self.state != SessionState::Opened {
            return Err(CaptureError::InvalidState(self.state.name()));
        }
        let Some(device) = self.device.as_mut() else {
            return Err(CaptureError::InvalidState(SessionState::Closed.name()));
        };

        let mut buffers_requested = false;
        match Self::negotiate(device, &self.format, &mut buffers_requested) {
            Ok((descriptor, mapping)) => {
                info!(
                    "Configured {}: buffer {} length {} offset {:#x}",
                    self.format, descriptor.index, descriptor.length, descriptor.offset
                );
                self.descriptor = Some(descriptor);
                self.mapping = Some(mapping);
                self.state = SessionState::Configured;
                Ok(())
            }
            Err(err) => {
                error!("Configuring {} failed: {}", self.name, err);
                if buffers_requested {
                    if let Err(e) = device.request_buffers(0) {
                        warn!("Releasing buffers after failed setup: {}", e);
                    }
                }
                self.device = None;
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    fn negotiate(
        device: &mut D,
        format: &CaptureFormat,
        buffers_requested: &mut bool,
    ) -> Result<(BufferDescriptor, D::Mapping), CaptureError> {
        let applied = device
            .set_format(format)
            .map_err(setup(SetupStage::SetFormat))?;
        if applied != *format {
            return Err(CaptureError::FormatRejected {
                requested: *format,
                applied,
            });
        }

        let granted = device
            .request_buffers(1)
            .map_err(setup(SetupStage::RequestBuffers))?;
        *buffers_requested = true;
        if granted != 1 {
            return Err(CaptureError::BufferCount(granted));
        }

        let descriptor = device
            .query_buffer(BUFFER_INDEX)
            .map_err(setup(SetupStage::QueryBuffer))?;
        let required = format.raw_frame_len();
        if (descriptor.length as usize) < required {
            return Err(CaptureError::BufferTooSmall {
                length: descriptor.length,
                required,
            });
        }

        let mut mapping = device
            .map_buffer(&descriptor)
            .map_err(setup(SetupStage::MapBuffer))?;
        mapping.deref_mut().fill(0);

        Ok((descriptor, mapping))
    }

    /// Turn the stream on. A failure closes the session.
    #[instrument(skip(self), fields(device = %self.name))]
    pub fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.state != SessionState::Configured {
            return Err(CaptureError::InvalidState(self.state.name()));
        }
        let Some(device) = self.device.as_mut() else {
            return Err(CaptureError::InvalidState(SessionState::Closed.name()));
        };

        if let Err(source) = device.stream_on() {
            error!("Stream on failed for {}: {}", self.name, source);
            self.close();
            return Err(CaptureError::Setup {
                stage: SetupStage::StreamOn,
                source,
            });
        }
        self.state = SessionState::Streaming;
        info!("Streaming from {}", self.name);
        Ok(())
    }

    /// Enqueue the buffer, wait for the driver to fill it and dequeue it.
    ///
    /// Returns the frame bytes (exactly one frame, `width * height * 2`) which
    /// stay valid until the next call. The wait is bounded by the dequeue
    /// timeout and ends early when the abort handle is raised.
    #[instrument(level = "trace", skip(self))]
    pub fn capture_step(&mut self) -> Result<(&[u8], DequeuedBuffer), StepError> {
        if self.state != SessionState::Streaming {
            return Err(StepError::InvalidState(self.state.name()));
        }
        if self.abort.is_aborted() {
            return Err(StepError::Cancelled);
        }
        let (Some(device), Some(mapping)) = (self.device.as_mut(), self.mapping.as_mut()) else {
            return Err(StepError::InvalidState(SessionState::Closed.name()));
        };

        // A buffer still queued from a timed-out step pairs with this dequeue.
        if !self.in_flight {
            device.queue(BUFFER_INDEX).map_err(StepError::from_io)?;
            self.in_flight = true;
        }

        let deadline = Instant::now() + self.dequeue_timeout;
        loop {
            if self.abort.is_aborted() {
                return Err(StepError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransientCause::Timeout(self.dequeue_timeout).into());
            }
            if device
                .wait_ready((deadline - now).min(WAIT_SLICE))
                .map_err(StepError::from_io)?
            {
                break;
            }
        }

        let dequeued = match device.dequeue(BUFFER_INDEX, mapping.deref_mut()) {
            Ok(dequeued) => dequeued,
            Err(err) => {
                if !still_queued(&err) {
                    self.in_flight = false;
                }
                return Err(StepError::from_io(err));
            }
        };
        self.in_flight = false;

        if dequeued.corrupt {
            return Err(TransientCause::CorruptBuffer.into());
        }
        let expected = self.format.raw_frame_len();
        if (dequeued.bytes_used as usize) < expected {
            return Err(TransientCause::ShortFrame {
                bytes_used: dequeued.bytes_used,
                expected,
            }
            .into());
        }
        debug!(
            "Dequeued sequence {} ({} bytes)",
            dequeued.sequence, dequeued.bytes_used
        );

        Ok((&mapping[..expected], dequeued))
    }

    /// Stream off, release and unmap the buffer, close the device.
    ///
    /// Runs its teardown once; later calls do nothing. Failures are logged.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Opened => {}
            SessionState::Configured | SessionState::Streaming => {
                if let Some(device) = self.device.as_mut() {
                    if let Err(e) = device.stream_off() {
                        warn!("Stream off failed for {}: {}", self.name, e);
                    }
                    // Buffers cannot be released while still mapped.
                    self.mapping = None;
                    if let Err(e) = device.request_buffers(0) {
                        warn!("Releasing buffers of {} failed: {}", self.name, e);
                    }
                }
            }
        }
        self.mapping = None;
        self.descriptor = None;
        self.device = None;
        self.in_flight = false;
        self.state = SessionState::Closed;
        info!("Closed {}", self.name);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn descriptor(&self) -> Option<BufferDescriptor> {
        self.descriptor
    }

    pub fn capability(&self) -> Option<&DeviceCapability> {
        self.capability.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl<D: CaptureDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

fn setup(stage: SetupStage) -> impl FnOnce(std::io::Error) -> CaptureError {
    move |source| CaptureError::Setup { stage, source }
}

/// Errors after which the driver still holds the buffer.
fn still_queued(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR))
}
