//! End-to-end capture through the simulated device: dequeue, convert, present.

use std::thread;
use std::time::Duration;

use camreader::capture::decoder::FrameConverter;
use camreader::capture::sim::{SimCall, SimFault, SimFrames, SimulatedDevice};
use camreader::capture::{CaptureFormat, DeviceSession, RgbFrame};
use camreader::display::PngSnapshot;
use camreader::error::StepError;
use camreader::pipeline::{CapturePipeline, Flow, FrameSink, FrameSource, StepOutcome, StepRunner};

const TIMEOUT: Duration = Duration::from_millis(500);

fn streaming(dev: SimulatedDevice) -> CapturePipeline<SimulatedDevice> {
    let session = DeviceSession::open(dev, TIMEOUT).unwrap();
    CapturePipeline::new(session).unwrap()
}

/// Raw frame whose luma ramps along each row, with neutral chroma.
fn luma_ramp(offset: u8) -> Vec<u8> {
    let fmt = CaptureFormat::VGA_YUYV;
    let mut raw = Vec::with_capacity(fmt.raw_frame_len());
    for _ in 0..fmt.height {
        for x in 0..fmt.width {
            raw.push((x as u8).wrapping_add(offset));
            raw.push(128);
        }
    }
    raw
}

#[test]
fn single_step_yields_full_non_black_frame() {
    let mut pipeline = streaming(SimulatedDevice::new(CaptureFormat::VGA_YUYV));

    let StepOutcome::Captured(frame) = pipeline.capture_step().unwrap() else {
        panic!("first step should capture");
    };
    assert_eq!(frame.data.len(), 640 * 480 * 3);
    assert_eq!((frame.width, frame.height), (640, 480));
    assert!(frame.data.iter().any(|&b| b != 0));
}

#[test]
fn each_step_reflects_its_own_dequeue() {
    let first = luma_ramp(0);
    let second = luma_ramp(100);
    let mut pipeline = streaming(
        SimulatedDevice::new(CaptureFormat::VGA_YUYV)
            .with_frames(SimFrames::Sequence(vec![first.clone(), second.clone()])),
    );
    let converter = FrameConverter::new(CaptureFormat::VGA_YUYV).unwrap();

    let StepOutcome::Captured(frame) = pipeline.capture_step().unwrap() else {
        panic!("step 1 should capture");
    };
    assert_eq!(frame.data, converter.convert_to_vec(&first).unwrap());
    assert_eq!(frame.pixel(5, 7), Some((5, 5, 5)));
    let first_sequence = frame.sequence;

    let StepOutcome::Captured(frame) = pipeline.capture_step().unwrap() else {
        panic!("step 2 should capture");
    };
    assert_eq!(frame.data, converter.convert_to_vec(&second).unwrap());
    assert_eq!(frame.pixel(5, 7), Some((105, 105, 105)));
    assert_eq!(frame.sequence, first_sequence + 1);
}

#[test]
fn short_frame_is_transient() {
    let mut pipeline = streaming(
        SimulatedDevice::new(CaptureFormat::VGA_YUYV)
            .fail_on(SimCall::Dequeue, SimFault::ShortFrame(1000)),
    );
    match pipeline.capture_step().unwrap() {
        StepOutcome::Reused { previous, cause } => {
            // Nothing captured yet, so the placeholder stands in.
            assert_eq!(previous.unwrap().pixel(1, 1), Some((255, 0, 0)));
            assert!(cause.to_string().contains("short frame"));
        }
        StepOutcome::Captured(_) => panic!("short frame must not be converted"),
    }
    assert!(matches!(
        pipeline.capture_step().unwrap(),
        StepOutcome::Captured(_)
    ));
}

#[test]
fn abort_from_another_thread_interrupts_a_stalled_wait() {
    let mut dev = SimulatedDevice::new(CaptureFormat::VGA_YUYV);
    for _ in 0..20 {
        dev = dev.fail_on(SimCall::WaitReady, SimFault::Stall);
    }
    let session = DeviceSession::open(dev, Duration::from_secs(30)).unwrap();
    let mut pipeline = CapturePipeline::new(session).unwrap();

    let abort = pipeline.abort_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        abort.abort();
    });

    assert!(matches!(pipeline.capture_step(), Err(StepError::Cancelled)));
    aborter.join().unwrap();
    // Once raised, the flag keeps later steps from starting.
    assert!(matches!(pipeline.capture_step(), Err(StepError::Cancelled)));
}

#[derive(Default)]
struct CountingSink {
    frames: usize,
    bytes: usize,
}

impl FrameSink for CountingSink {
    fn present(&mut self, frame: &RgbFrame) -> color_eyre::Result<()> {
        self.frames += 1;
        self.bytes = frame.data.len();
        Ok(())
    }
}

#[test]
fn runner_rides_out_transient_errors_and_stops_on_cancel() {
    let mut pipeline = streaming(
        SimulatedDevice::new(CaptureFormat::VGA_YUYV)
            .fail_after(SimCall::Dequeue, 1, SimFault::Errno(libc::EIO)),
    );
    let mut sink = CountingSink::default();
    let mut runner = StepRunner::new(3);

    assert_eq!(runner.run_frames(&mut pipeline, &mut sink, 3).unwrap(), 3);
    // Three captures plus the previous frame shown again once.
    assert_eq!(sink.frames, 4);
    assert_eq!(sink.bytes, 640 * 480 * 3);

    pipeline.abort_handle().abort();
    assert_eq!(runner.tick(&mut pipeline, &mut sink).unwrap(), Flow::Stop);
}

#[test]
fn device_loss_mid_stream_is_fatal() {
    let mut pipeline = streaming(
        SimulatedDevice::new(CaptureFormat::VGA_YUYV)
            .fail_after(SimCall::Queue, 2, SimFault::Errno(libc::ENODEV)),
    );
    let mut sink = CountingSink::default();
    let mut runner = StepRunner::new(3);

    assert!(runner.run_frames(&mut pipeline, &mut sink, 10).is_err());
    assert_eq!(sink.frames, 2);
}

#[test]
fn snapshot_of_simulated_bars() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bars.png");
    let mut pipeline = streaming(SimulatedDevice::new(CaptureFormat::VGA_YUYV));
    let mut sink = PngSnapshot::new(&path);

    StepRunner::new(0)
        .run_frames(&mut pipeline, &mut sink, 2)
        .unwrap();
    sink.save().unwrap();

    let image = image::open(&path).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (640, 480));
    // Leftmost bar of the first frames is white.
    let [r, g, b] = image.get_pixel(0, 0).0;
    assert!(r > 250 && g > 250 && b > 250, "got {:?}", (r, g, b));
}
