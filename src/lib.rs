pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureFormat, DeviceSession, FrameConverter, RgbFrame};
pub use error::{CaptureError, StepError};
pub use pipeline::{CapturePipeline, FrameSink, FrameSource, StepOutcome};

/// Config file read when `CAMREADER_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "camreader.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: String,
    pub dequeue_timeout_ms: u64,
    /// Use the built-in simulated camera instead of `device`
    pub simulate: bool,
    pub max_consecutive_transient: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub scale: u32,
    /// Headless mode: write a frame here instead of opening a window
    pub snapshot: Option<PathBuf>,
    pub snapshot_frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            dequeue_timeout_ms: 2000,
            simulate: false,
            max_consecutive_transient: 30,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "camreader".into(),
            scale: 1,
            snapshot: None,
            // Let auto-exposure settle before the frame that gets written
            snapshot_frames: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "camreader=info".into(),
        }
    }
}

impl CaptureConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl Config {
    /// Defaults, then `$CAMREADER_CONFIG` (or `camreader.toml`) if present,
    /// then `CAMREADER_*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = env::var_os("CAMREADER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Like [`load`](Self::load) with an explicit file. A missing file is not
    /// an error.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::layered(path, Self::environment())
    }

    /// `CAMREADER_CAPTURE__DEVICE=/dev/video2` sets `capture.device`.
    fn environment() -> config::Environment {
        config::Environment::with_prefix("CAMREADER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn layered(path: &Path, env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()
    }
}
