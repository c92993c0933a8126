//! Headless sink that keeps the latest frame and writes it out as an image

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use tracing::info;

use crate::capture::RgbFrame;
use crate::pipeline::FrameSink;

pub struct PngSnapshot {
    path: PathBuf,
    last: Option<RgbFrame>,
}

impl PngSnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last: None,
        }
    }

    pub fn last(&self) -> Option<&RgbFrame> {
        self.last.as_ref()
    }

    /// Write the most recent frame. The format follows the file extension.
    pub fn save(&self) -> Result<()> {
        let frame = self
            .last
            .as_ref()
            .ok_or_else(|| eyre!("no frame was captured"))?;
        let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| eyre!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        image.save(&self.path)?;
        info!("Wrote frame {} to {}", frame.sequence, self.path.display());
        Ok(())
    }
}

impl FrameSink for PngSnapshot {
    fn present(&mut self, frame: &RgbFrame) -> Result<()> {
        match &mut self.last {
            Some(last) => last.clone_from(frame),
            None => self.last = Some(frame.clone()),
        }
        Ok(())
    }
}
