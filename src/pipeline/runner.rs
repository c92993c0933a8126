use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use crate::error::StepError;
use crate::pipeline::{FrameSink, FrameSource, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Drives a [`FrameSource`] into a [`FrameSink`], one step per tick.
///
/// Transient failures are tolerated up to a limit of consecutive
/// occurrences; during them the sink is shown the last good frame again.
#[derive(Debug)]
pub struct StepRunner {
    max_consecutive_transient: u32,
    consecutive_transient: u32,
    presented: u64,
}

impl StepRunner {
    pub fn new(max_consecutive_transient: u32) -> Self {
        Self {
            max_consecutive_transient,
            consecutive_transient: 0,
            presented: 0,
        }
    }

    /// Frames captured and presented so far. Re-shown frames do not count.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn tick<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<Flow>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        match source.capture_step() {
            Ok(StepOutcome::Captured(frame)) => {
                self.consecutive_transient = 0;
                sink.present(frame)?;
                self.presented += 1;
                Ok(Flow::Continue)
            }
            Ok(StepOutcome::Reused { previous, cause }) => {
                self.consecutive_transient += 1;
                if self.consecutive_transient > self.max_consecutive_transient {
                    return Err(eyre!(
                        "giving up after {} consecutive capture failures, last: {}",
                        self.consecutive_transient,
                        cause
                    ));
                }
                if let Some(frame) = previous {
                    sink.present(frame)?;
                }
                Ok(Flow::Continue)
            }
            Err(StepError::Cancelled) => {
                info!("Capture cancelled after {} frames", self.presented);
                Ok(Flow::Stop)
            }
            Err(e) => {
                error!("Capture failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Tick until `frames` new frames have been presented or the source stops.
    pub fn run_frames<S, K>(&mut self, source: &mut S, sink: &mut K, frames: u64) -> Result<u64>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let target = self.presented + frames;
        while self.presented < target {
            if self.tick(source, sink)? == Flow::Stop {
                break;
            }
        }
        Ok(self.presented)
    }
}
