//! In-process stand-in for a V4L2 capture node.
//!
//! Produces YUYV frames without hardware, lets callers inject driver
//! failures per call, and records every protocol call in a shared journal.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::capture::device::{CaptureDevice, DeviceCapability};
use crate::capture::frame::{BufferDescriptor, CaptureFormat, DequeuedBuffer};

/// Protocol calls, in the order the simulated driver saw them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCall {
    QueryCapability,
    SetFormat,
    RequestBuffers(u32),
    QueryBuffer,
    MapBuffer,
    StreamOn,
    StreamOff,
    Queue,
    WaitReady,
    Dequeue,
    Close,
}

/// Failure injected into the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Fail with this errno.
    Errno(i32),
    /// `wait_ready` sleeps out its timeout and reports nothing ready.
    Stall,
    /// `dequeue` reports only this many bytes used.
    ShortFrame(u32),
    /// `dequeue` sets the driver error flag.
    ErrorFlag,
}

/// Shared record of calls made against a [`SimulatedDevice`].
#[derive(Debug, Clone, Default)]
pub struct SimJournal {
    calls: Arc<Mutex<Vec<SimCall>>>,
}

impl SimJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<SimCall>> {
        // A panicking test thread cannot leave the log half-written.
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: SimCall) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().clone()
    }

    pub fn count(&self, call: SimCall) -> usize {
        self.lock().iter().filter(|c| **c == call).count()
    }
}

/// Where frame contents come from.
#[derive(Debug, Clone)]
pub enum SimFrames {
    /// Vertical color bars that scroll a little every frame.
    ColorBars,
    /// Caller-supplied raw frames, played in order; the last one repeats.
    Sequence(Vec<Vec<u8>>),
}

pub struct SimulatedDevice {
    name: String,
    format: CaptureFormat,
    /// Overrides the buffer length the driver reports.
    buffer_len: Option<u32>,
    /// Overrides the format the driver applies.
    applied_format: Option<CaptureFormat>,
    granted_buffers: Option<u32>,
    frames: SimFrames,
    /// `(call, matching calls still to let through, fault)`
    faults: VecDeque<(SimCall, usize, SimFault)>,
    journal: SimJournal,
    buffers: u32,
    streaming: bool,
    queued: bool,
    sequence: u32,
}

impl SimulatedDevice {
    pub fn new(format: CaptureFormat) -> Self {
        Self {
            name: "sim://camera0".to_string(),
            format,
            buffer_len: None,
            applied_format: None,
            granted_buffers: None,
            frames: SimFrames::ColorBars,
            faults: VecDeque::new(),
            journal: SimJournal::default(),
            buffers: 0,
            streaming: false,
            queued: false,
            sequence: 0,
        }
    }

    pub fn with_frames(mut self, frames: SimFrames) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_buffer_len(mut self, len: u32) -> Self {
        self.buffer_len = Some(len);
        self
    }

    pub fn with_applied_format(mut self, format: CaptureFormat) -> Self {
        self.applied_format = Some(format);
        self
    }

    pub fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted_buffers = Some(count);
        self
    }

    /// Fail the next `call` with `fault`. Faults for the same call fire in
    /// the order they were added.
    pub fn fail_on(self, call: SimCall, fault: SimFault) -> Self {
        self.fail_after(call, 0, fault)
    }

    /// Let `skip` matching calls succeed, then fail the next one with `fault`.
    pub fn fail_after(mut self, call: SimCall, skip: usize, fault: SimFault) -> Self {
        self.faults.push_back((call, skip, fault));
        self
    }

    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }

    fn take_fault(&mut self, call: SimCall) -> Option<SimFault> {
        let at = self.faults.iter().position(|(c, _, _)| *c == call)?;
        let (_, skip, _) = &mut self.faults[at];
        if *skip > 0 {
            *skip -= 1;
            return None;
        }
        self.faults.remove(at).map(|(_, _, fault)| fault)
    }

    fn enter(&mut self, call: SimCall) -> io::Result<Option<SimFault>> {
        self.journal.record(call);
        match self.take_fault(call) {
            Some(SimFault::Errno(errno)) => Err(io::Error::from_raw_os_error(errno)),
            other => Ok(other),
        }
    }

    fn frame_len(&self) -> usize {
        self.format.raw_frame_len()
    }

    fn fill(&self, memory: &mut [u8]) {
        let len = self.frame_len().min(memory.len());
        match &self.frames {
            SimFrames::ColorBars => {
                color_bars(&mut memory[..len], self.format.width, self.sequence);
            }
            SimFrames::Sequence(frames) => {
                let Some(last) = frames.len().checked_sub(1) else {
                    return;
                };
                let frame = &frames[(self.sequence as usize).min(last)];
                let n = frame.len().min(len);
                memory[..n].copy_from_slice(&frame[..n]);
            }
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.journal.record(SimCall::Close);
    }
}

impl CaptureDevice for SimulatedDevice {
    type Mapping = Vec<u8>;

    fn name(&self) -> &str {
        &self.name
    }

    fn query_capability(&mut self) -> io::Result<DeviceCapability> {
        self.enter(SimCall::QueryCapability)?;
        Ok(DeviceCapability {
            driver: "camreader-sim".to_string(),
            card: "Simulated Camera".to_string(),
            bus: "virtual".to_string(),
            video_capture: true,
            streaming: true,
        })
    }

    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<CaptureFormat> {
        self.enter(SimCall::SetFormat)?;
        Ok(self.applied_format.unwrap_or(*format))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.enter(SimCall::RequestBuffers(count))?;
        if self.streaming {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.buffers = match count {
            0 => 0,
            n => self.granted_buffers.unwrap_or(n),
        };
        Ok(self.buffers)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        self.enter(SimCall::QueryBuffer)?;
        if index >= self.buffers {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(BufferDescriptor {
            index,
            length: self.buffer_len.unwrap_or(self.frame_len() as u32),
            offset: 0,
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<Vec<u8>> {
        self.enter(SimCall::MapBuffer)?;
        // Fresh mappings are not guaranteed to be clean.
        Ok(vec![0x5A; descriptor.length as usize])
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.enter(SimCall::StreamOn)?;
        if self.buffers == 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.enter(SimCall::StreamOff)?;
        self.streaming = false;
        self.queued = false;
        Ok(())
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        self.enter(SimCall::Queue)?;
        if index >= self.buffers || self.queued {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.queued = true;
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        if let Some(SimFault::Stall) = self.enter(SimCall::WaitReady)? {
            debug!("Simulated stall for {:?}", timeout);
            std::thread::sleep(timeout);
            return Ok(false);
        }
        Ok(self.streaming && self.queued)
    }

    fn dequeue(&mut self, index: u32, memory: &mut [u8]) -> io::Result<DequeuedBuffer> {
        let fault = match self.enter(SimCall::Dequeue) {
            Ok(fault) => fault,
            Err(err) => {
                // Only "try again" leaves the buffer with the driver.
                if !matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EINTR)) {
                    self.queued = false;
                }
                return Err(err);
            }
        };
        if !self.streaming || !self.queued || index >= self.buffers {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.queued = false;

        self.fill(memory);
        let mut buffer = DequeuedBuffer {
            index,
            bytes_used: self.frame_len() as u32,
            sequence: self.sequence,
            timestamp: Some(Duration::from_millis(33) * self.sequence),
            corrupt: false,
        };
        match fault {
            Some(SimFault::ShortFrame(bytes)) => buffer.bytes_used = bytes,
            Some(SimFault::ErrorFlag) => buffer.corrupt = true,
            _ => {}
        }
        self.sequence = self.sequence.wrapping_add(1);
        Ok(buffer)
    }
}

const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (16, 16, 16),
];

/// Full-range BT.601 RGB to YUV, the inverse of the capture conversion.
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;
    let narrow = |x: f64| x.round().clamp(0.0, 255.0) as u8;
    (narrow(y), narrow(u), narrow(v))
}

/// Paint scrolling color bars into a tightly packed YUYV buffer.
fn color_bars(raw: &mut [u8], width: u32, sequence: u32) {
    let width = width as usize;
    let bar_width = (width / BARS.len()).max(1);
    let shift = (sequence as usize * 4) % width.max(1);
    let row_len = width * 2;

    for row in raw.chunks_exact_mut(row_len) {
        for (pair, group) in row.chunks_exact_mut(4).enumerate() {
            let x = (pair * 2 + shift) % width;
            let (r, g, b) = BARS[(x / bar_width).min(BARS.len() - 1)];
            let (y, u, v) = rgb_to_yuv(r, g, b);
            group.copy_from_slice(&[y, u, y, v]);
        }
    }
}
