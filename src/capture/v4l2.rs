//! V4L2 single-buffer mmap capture on top of the `v4l` ioctl layer

use std::io;
use std::mem;
use std::os::fd::BorrowedFd;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::{CaptureDevice, DeviceCapability};
use crate::capture::frame::{BufferDescriptor, CaptureFormat, DequeuedBuffer, PixelFormat};

/// `V4L2_BUF_FLAG_ERROR` from videodev2.h
const BUF_FLAG_ERROR: u32 = 0x0000_0040;

/// An opened V4L2 video capture node
pub struct V4l2Device {
    device: Box<Device>,
    fd: RawFd,
    path: String,
}

impl V4l2Device {
    /// Open `path` read-write.
    #[instrument]
    pub fn open(path: &str) -> io::Result<Self> {
        let device = Device::with_path(path)?;
        let fd = device.handle().fd();
        info!("Opened capture device {}", path);

        Ok(Self {
            device: Box::new(device),
            fd,
            path: path.to_string(),
        })
    }

    fn blank_buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain old data; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf.index = index;
        buf
    }

    /// Issue `request` with `arg` as its in/out argument.
    ///
    /// # Safety
    /// `T` must be the argument type the kernel expects for `request`.
    unsafe fn ioctl<T>(&self, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        v4l2::ioctl(self.fd, request, arg as *mut T as *mut c_void)
    }
}

impl CaptureDevice for V4l2Device {
    type Mapping = MmapMut;

    fn name(&self) -> &str {
        &self.path
    }

    fn query_capability(&mut self) -> io::Result<DeviceCapability> {
        let caps = self.device.query_caps()?;
        Ok(DeviceCapability {
            driver: caps.driver,
            card: caps.card,
            bus: caps.bus,
            video_capture: caps.capabilities.contains(CapFlags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(CapFlags::STREAMING),
        })
    }

    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<CaptureFormat> {
        let mut fmt = self.device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(&format.pixel_format.fourcc());
        fmt.stride = format.bytes_per_line;
        fmt.field_order = if format.interlaced {
            FieldOrder::Interlaced
        } else {
            FieldOrder::Progressive
        };

        let applied = self.device.set_format(&fmt)?;
        debug!(
            "Driver applied {}x{} {} stride {}",
            applied.width, applied.height, applied.fourcc, applied.stride
        );

        let pixel_format = PixelFormat::from_fourcc(&applied.fourcc.repr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver applied unsupported fourcc {}", applied.fourcc),
            )
        })?;
        let applied = CaptureFormat {
            width: applied.width,
            height: applied.height,
            pixel_format,
            bytes_per_line: applied.stride,
            interlaced: applied.field_order != FieldOrder::Progressive,
        };
        Ok(applied)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: plain old data, zero is valid.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: VIDIOC_REQBUFS takes a v4l2_requestbuffers.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        let mut buf = Self::blank_buffer(index);
        // SAFETY: VIDIOC_QUERYBUF takes a v4l2_buffer.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_QUERYBUF, &mut buf)? };

        Ok(BufferDescriptor {
            index,
            length: buf.length,
            // SAFETY: the driver fills `m.offset` for MMAP buffers.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MmapMut> {
        // SAFETY: the region belongs to this device and stays valid until
        // the mapping is dropped; the driver only writes while the buffer is
        // queued, and the session never reads it in that window.
        unsafe {
            MmapOptions::new()
                .len(descriptor.length as usize)
                .offset(descriptor.offset as u64)
                .map_mut(self.fd)
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: VIDIOC_STREAMON takes the buffer type as an int.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMON, &mut typ) }
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut typ = Type::VideoCapture as u32;
        // SAFETY: VIDIOC_STREAMOFF takes the buffer type as an int.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMOFF, &mut typ) }
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::blank_buffer(index);
        // SAFETY: VIDIOC_QBUF takes a v4l2_buffer.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_QBUF, &mut buf) }
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        // SAFETY: the descriptor stays open for as long as `self.device` lives.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        let ready = poll(&mut fds, PollTimeout::from(millis)).map_err(io::Error::from)?;
        Ok(ready > 0)
    }

    fn dequeue(&mut self, index: u32, _memory: &mut [u8]) -> io::Result<DequeuedBuffer> {
        let mut buf = Self::blank_buffer(index);
        // SAFETY: VIDIOC_DQBUF takes a v4l2_buffer.
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_DQBUF, &mut buf)? };

        let timestamp = Duration::from_secs(buf.timestamp.tv_sec as u64)
            + Duration::from_micros(buf.timestamp.tv_usec as u64);
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: (!timestamp.is_zero()).then_some(timestamp),
            corrupt: buf.flags & BUF_FLAG_ERROR != 0,
        })
    }
}
