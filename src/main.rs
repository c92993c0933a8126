//! camreader: 640x480 YUYV webcam capture with RGB display

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camreader::capture::{CaptureDevice, SimulatedDevice, V4l2Device};
use camreader::display::{PngSnapshot, Sdl2Display};
use camreader::pipeline::StepRunner;
use camreader::{utils, CaptureError, CaptureFormat, CapturePipeline, Config, DeviceSession};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camreader launching...");

    if config.capture.simulate {
        info!("Using simulated capture device");
        return run(SimulatedDevice::new(CaptureFormat::VGA_YUYV), &config);
    }

    let path = &config.capture.device;
    let device = match V4l2Device::open(path) {
        Ok(device) => device,
        Err(source) => {
            let candidates = utils::find_yuyv_devices();
            if !candidates.is_empty() {
                error!("YUYV capture devices present: {}", candidates.join(", "));
            }
            return Err(CaptureError::Open {
                path: path.clone(),
                source,
            }
            .into());
        }
    };
    utils::describe_device(path);

    run(device, &config)
}

fn run<D: CaptureDevice>(device: D, config: &Config) -> Result<()> {
    let session = DeviceSession::open(device, config.capture.dequeue_timeout())?;
    let mut pipeline = CapturePipeline::new(session)?;
    let mut runner = StepRunner::new(config.capture.max_consecutive_transient);

    match &config.display.snapshot {
        Some(path) => {
            let mut sink = PngSnapshot::new(path);
            runner.run_frames(&mut pipeline, &mut sink, config.display.snapshot_frames)?;
            sink.save()?;
        }
        None => {
            let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
            let format = pipeline.session().format();
            let mut display = Sdl2Display::new(&sdl_context, format.width, format.height, &config.display)?;
            display.run(&sdl_context, &mut pipeline, &mut runner)?;
        }
    }

    pipeline.close();
    info!("camreader shutting down after {} frames", runner.presented());
    Ok(())
}
