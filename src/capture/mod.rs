pub mod decoder;
pub mod device;
pub mod frame;
pub mod session;
pub mod sim;
pub mod v4l2;

pub use decoder::FrameConverter;
pub use device::{CaptureDevice, DeviceCapability};
pub use frame::{BufferDescriptor, CaptureFormat, DequeuedBuffer, PixelFormat, RgbFrame};
pub use session::{AbortHandle, DeviceSession, SessionState};
pub use sim::SimulatedDevice;
pub use v4l2::V4l2Device;
