use std::fmt;
use std::time::{Duration, Instant};

/// Bytes per pixel of a decoded `R G B` frame
pub const RGB24_BYTES_PER_PIXEL: usize = 3;

/// Raw pixel formats the capture path accepts from a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair
    Yuyv,
}

impl PixelFormat {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
        }
    }
}

/// Negotiated capture geometry. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Bytes from the start of one row to the next, as the driver lays
    /// them out.
    pub bytes_per_line: u32,
    /// Progressive frames only; interlaced fields are never requested.
    pub interlaced: bool,
}

impl CaptureFormat {
    pub const VGA_YUYV: CaptureFormat = CaptureFormat {
        width: 640,
        height: 480,
        pixel_format: PixelFormat::Yuyv,
        bytes_per_line: 640 * 2,
        interlaced: false,
    };

    /// Tightly packed `width` x `height` frame of `pixel_format`.
    pub fn packed(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            bytes_per_line: width * pixel_format.bytes_per_pixel() as u32,
            interlaced: false,
        }
    }

    pub fn raw_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB24_BYTES_PER_PIXEL
    }

    /// Row length of a tightly packed frame
    pub fn raw_stride(&self) -> u32 {
        self.width * self.pixel_format.bytes_per_pixel() as u32
    }

    /// Rows carry driver padding the converter does not skip.
    pub fn is_padded(&self) -> bool {
        self.bytes_per_line != self.raw_stride()
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc = self.pixel_format.fourcc();
        write!(
            f,
            "{}x{} {}",
            self.width,
            self.height,
            String::from_utf8_lossy(&fourcc)
        )?;
        if self.is_padded() {
            write!(f, " stride {}", self.bytes_per_line)?;
        }
        if self.interlaced {
            f.write_str(" interlaced")?;
        }
        Ok(())
    }
}

/// Location of one driver buffer inside the device's mappable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub index: u32,
    pub length: u32,
    pub offset: u32,
}

/// What the driver reports when it hands a filled buffer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    /// Hardware timestamp if available
    pub timestamp: Option<Duration>,
    /// Driver set the error flag; contents may be garbage.
    pub corrupt: bool,
}

/// One decoded frame, row-major `R G B`.
///
/// The pipeline rewrites the same `RgbFrame` every step, so anything that
/// needs a frame past the next step must clone it.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub captured_at: Instant,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * RGB24_BYTES_PER_PIXEL],
            width,
            height,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    /// Purple frame with a 3 pixel red border, shown until the first capture.
    pub fn placeholder(width: u32, height: u32) -> Self {
        const FILL: [u8; 3] = [137, 43, 226];
        const BORDER: [u8; 3] = [255, 0, 0];
        const EDGE: u32 = 3;

        let mut frame = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let on_edge = x < EDGE
                    || y < EDGE
                    || x >= width.saturating_sub(EDGE)
                    || y >= height.saturating_sub(EDGE);
                let at = y as usize * frame.stride() + x as usize * RGB24_BYTES_PER_PIXEL;
                frame.data[at..at + RGB24_BYTES_PER_PIXEL]
                    .copy_from_slice(if on_edge { &BORDER } else { &FILL });
            }
        }
        frame
    }

    pub fn stride(&self) -> usize {
        self.width as usize * RGB24_BYTES_PER_PIXEL
    }

    /// `(r, g, b)` at pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.stride() + x as usize * 3;
        Some((self.data[at], self.data[at + 1], self.data[at + 2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vga_yuyv_lengths() {
        let fmt = CaptureFormat::VGA_YUYV;
        assert_eq!(fmt.raw_frame_len(), 640 * 480 * 2);
        assert_eq!(fmt.rgb_frame_len(), 640 * 480 * 3);
        assert_eq!(fmt.raw_stride(), 1280);
        assert_eq!(fmt.to_string(), "640x480 YUYV");
        assert_eq!(CaptureFormat::packed(640, 480, PixelFormat::Yuyv), fmt);
    }

    #[test]
    fn padded_rows_are_visible() {
        let padded = CaptureFormat {
            bytes_per_line: 1344,
            ..CaptureFormat::VGA_YUYV
        };
        assert!(padded.is_padded());
        assert!(!CaptureFormat::VGA_YUYV.is_padded());
        assert_ne!(padded, CaptureFormat::VGA_YUYV);
        assert_eq!(padded.to_string(), "640x480 YUYV stride 1344");
    }

    #[test]
    fn fourcc_round_trip_names() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
        assert_eq!(PixelFormat::from_fourcc(b"RGB3"), None);
    }

    #[test]
    fn placeholder_has_red_border_around_purple() {
        let frame = RgbFrame::placeholder(640, 480);
        for (x, y) in [(0, 0), (2, 240), (639, 479), (320, 477), (637, 10)] {
            assert_eq!(frame.pixel(x, y), Some((255, 0, 0)), "({x}, {y})");
        }
        for (x, y) in [(3, 3), (320, 240), (636, 476)] {
            assert_eq!(frame.pixel(x, y), Some((137, 43, 226)), "({x}, {y})");
        }
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let mut frame = RgbFrame::new(4, 2);
        frame.data[21..24].copy_from_slice(&[1, 2, 3]);
        assert_eq!(frame.pixel(3, 1), Some((1, 2, 3)));
        assert_eq!(frame.pixel(4, 0), None);
    }
}
