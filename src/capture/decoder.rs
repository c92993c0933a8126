//! YUYV (packed 4:2:2) to RGB24 conversion, BT.601 full range.
//!
//! Luma is used as-is; no `(Y - 16) * 1.164` studio-range expansion is applied.

use crate::capture::frame::CaptureFormat;
use crate::error::ConvertError;

const CR_TO_R: f64 = 1.402;
const CB_TO_G: f64 = 0.344136;
const CR_TO_G: f64 = 0.714136;
const CB_TO_B: f64 = 1.772;

/// Narrow one computed channel to a byte.
///
/// Out-of-range values saturate at 0 and 255; in-range values are truncated
/// toward zero.
#[inline]
pub fn saturate_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Convert one `Y0 U Y1 V` group into two RGB pixels.
///
/// Evaluated in `f64`, term by term from luma, so results that land exactly
/// on an integer are not truncated to the one below.
#[inline]
pub fn yuyv_pair_to_rgb(group: [u8; 4]) -> [u8; 6] {
    let [y0, u, y1, v] = group;
    let cb = u as f64 - 128.0;
    let cr = v as f64 - 128.0;

    let to_rgb = |y: u8| {
        let y = y as f64;
        [
            saturate_channel(y + CR_TO_R * cr),
            saturate_channel(y - CB_TO_G * cb - CR_TO_G * cr),
            saturate_channel(y + CB_TO_B * cb),
        ]
    };
    let [r0, g0, b0] = to_rgb(y0);
    let [r1, g1, b1] = to_rgb(y1);
    [r0, g0, b0, r1, g1, b1]
}

/// Stateless converter bound to one frame geometry.
#[derive(Debug, Clone, Copy)]
pub struct FrameConverter {
    width: u32,
    height: u32,
}

impl FrameConverter {
    pub fn new(format: CaptureFormat) -> Result<Self, ConvertError> {
        Self::with_size(format.width, format.height)
    }

    pub fn with_size(width: u32, height: u32) -> Result<Self, ConvertError> {
        if width % 2 != 0 {
            return Err(ConvertError::OddWidth(width));
        }
        Ok(Self { width, height })
    }

    pub fn raw_len(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }

    pub fn rgb_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Overwrite all of `out` with the RGB rendition of `raw`.
    ///
    /// `raw` may be longer than one frame (driver buffers are often padded);
    /// only the first `width * height * 2` bytes are read.
    pub fn convert(&self, raw: &[u8], out: &mut [u8]) -> Result<(), ConvertError> {
        let raw_len = self.raw_len();
        if raw.len() < raw_len {
            return Err(ConvertError::RawTooShort {
                actual: raw.len(),
                expected: raw_len,
            });
        }
        if out.len() != self.rgb_len() {
            return Err(ConvertError::OutputSize {
                actual: out.len(),
                expected: self.rgb_len(),
            });
        }

        // Rows are tightly packed, so pair k of the frame sits at raw[4k..]
        // and out[6k..] regardless of row boundaries.
        for (group, rgb) in raw[..raw_len]
            .chunks_exact(4)
            .zip(out.chunks_exact_mut(6))
        {
            let pixels = yuyv_pair_to_rgb([group[0], group[1], group[2], group[3]]);
            rgb.copy_from_slice(&pixels);
        }
        Ok(())
    }

    pub fn convert_to_vec(&self, raw: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let mut out = vec![0; self.rgb_len()];
        self.convert(raw, &mut out)?;
        Ok(out)
    }
}

/// One-shot YUYV to RGB24 conversion.
pub fn yuyv_to_rgb(raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    FrameConverter::with_size(width, height)?.convert_to_vec(raw)
}
