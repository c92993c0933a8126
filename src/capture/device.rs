use std::io;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::capture::frame::{BufferDescriptor, CaptureFormat, DequeuedBuffer};

/// Informational capability report. Nothing branches on these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapability {
    pub driver: String,
    pub card: String,
    pub bus: String,
    pub video_capture: bool,
    pub streaming: bool,
}

/// Raw streaming-capture primitives of one opened device.
///
/// Implementations own the OS handle and close it on drop. Every call maps
/// onto one driver request; ordering and state are the caller's business
/// (see [`DeviceSession`](crate::capture::DeviceSession)).
pub trait CaptureDevice {
    /// Memory shared with the driver for one buffer. Unmapped on drop.
    type Mapping: Deref<Target = [u8]> + DerefMut;

    /// Filesystem path or other identifier used in logs.
    fn name(&self) -> &str;

    fn query_capability(&mut self) -> io::Result<DeviceCapability>;

    /// Ask for `format`; returns what the driver actually applied.
    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<CaptureFormat>;

    /// Request `count` mmap buffers; returns how many the driver granted.
    /// A count of zero releases all buffers.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor>;

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<Self::Mapping>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    /// Hand buffer `index` to the driver for filling.
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Wait up to `timeout` for a filled buffer. `Ok(false)` on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Take buffer `index` back from the driver.
    ///
    /// `memory` is the mapping previously returned by `map_buffer`. Hardware
    /// fills it out of band and ignores the argument.
    fn dequeue(&mut self, index: u32, memory: &mut [u8]) -> io::Result<DequeuedBuffer>;
}
