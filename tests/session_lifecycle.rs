//! Setup, teardown and failure paths of a capture session against the
//! simulated device.

use std::time::Duration;

use camreader::capture::sim::{SimCall, SimFault, SimulatedDevice};
use camreader::capture::{CaptureFormat, DeviceSession, PixelFormat, SessionState};
use camreader::error::{CaptureError, SetupStage};

const TIMEOUT: Duration = Duration::from_millis(200);

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camreader=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn sim() -> SimulatedDevice {
    SimulatedDevice::new(CaptureFormat::VGA_YUYV)
}

#[test]
fn teardown_runs_once_per_configure() {
    init_test_tracing();
    let dev = sim();
    let journal = dev.journal();
    let mut session = DeviceSession::open(dev, TIMEOUT).unwrap();
    session.start_streaming().unwrap();

    session.close();
    session.close();
    drop(session);

    assert_eq!(journal.count(SimCall::StreamOff), 1);
    assert_eq!(journal.count(SimCall::RequestBuffers(0)), 1);
    assert_eq!(journal.count(SimCall::Close), 1);
}

#[test]
fn configured_but_never_streamed_still_tears_down() {
    let dev = sim();
    let journal = dev.journal();
    drop(DeviceSession::open(dev, TIMEOUT).unwrap());

    assert_eq!(journal.count(SimCall::StreamOn), 0);
    assert_eq!(journal.count(SimCall::StreamOff), 1);
    assert_eq!(journal.count(SimCall::Close), 1);
}

#[test]
fn close_without_configure_only_closes_handle() {
    let dev = sim();
    let journal = dev.journal();
    let mut session = DeviceSession::new(dev, TIMEOUT);
    session.close();
    session.close();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(journal.count(SimCall::StreamOff), 0);
    assert_eq!(journal.count(SimCall::Close), 1);
}

#[test]
fn buffer_smaller_than_a_frame_fails_fast() {
    init_test_tracing();
    let required = CaptureFormat::VGA_YUYV.raw_frame_len();
    let dev = sim().with_buffer_len(required as u32 - 1);
    let journal = dev.journal();

    let err = DeviceSession::open(dev, TIMEOUT).err().unwrap();
    match err {
        CaptureError::BufferTooSmall { length, required: r } => {
            assert_eq!(length as usize, required - 1);
            assert_eq!(r, required);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Nothing was mapped; the buffer request is undone and the handle closed.
    assert_eq!(journal.count(SimCall::MapBuffer), 0);
    assert_eq!(journal.count(SimCall::RequestBuffers(0)), 1);
    assert_eq!(journal.count(SimCall::Close), 1);
}

#[test]
fn padded_buffer_is_accepted() {
    let dev = sim().with_buffer_len(CaptureFormat::VGA_YUYV.raw_frame_len() as u32 + 4096);
    let session = DeviceSession::open(dev, TIMEOUT).unwrap();
    assert_eq!(
        session.descriptor().unwrap().length as usize,
        640 * 480 * 2 + 4096
    );
}

#[test]
fn every_setup_stage_failure_is_fatal_and_releases_resources() {
    let stages = [
        (SimCall::SetFormat, SetupStage::SetFormat, false),
        (SimCall::RequestBuffers(1), SetupStage::RequestBuffers, false),
        (SimCall::QueryBuffer, SetupStage::QueryBuffer, true),
        (SimCall::MapBuffer, SetupStage::MapBuffer, true),
    ];

    for (call, stage, releases_buffers) in stages {
        let dev = sim().fail_on(call, SimFault::Errno(libc::EINVAL));
        let journal = dev.journal();

        let mut session = DeviceSession::new(dev, TIMEOUT);
        match session.configure() {
            Err(CaptureError::Setup { stage: failed, .. }) => assert_eq!(failed, stage),
            other => panic!("{call:?}: unexpected result {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            journal.count(SimCall::RequestBuffers(0)),
            usize::from(releases_buffers),
            "{call:?}"
        );
        assert_eq!(journal.count(SimCall::Close), 1, "{call:?}");

        // A failed session is inert.
        session.close();
        assert!(session.start_streaming().is_err());
        assert_eq!(journal.count(SimCall::Close), 1, "{call:?}");
    }
}

#[test]
fn driver_substituting_format_is_rejected() {
    let applied = CaptureFormat::packed(320, 240, PixelFormat::Yuyv);
    let err = DeviceSession::open(sim().with_applied_format(applied), TIMEOUT)
        .err()
        .unwrap();
    assert!(matches!(err, CaptureError::FormatRejected { .. }));
    assert!(err.to_string().contains("320x240 YUYV"));
}

#[test]
fn driver_padding_rows_is_rejected() {
    let applied = CaptureFormat {
        bytes_per_line: 1344,
        ..CaptureFormat::VGA_YUYV
    };
    let dev = sim().with_applied_format(applied);
    let journal = dev.journal();
    let err = DeviceSession::open(dev, TIMEOUT).err().unwrap();
    assert!(matches!(err, CaptureError::FormatRejected { .. }));
    assert!(err.to_string().contains("stride 1344"));
    assert_eq!(journal.count(SimCall::RequestBuffers(1)), 0);
    assert_eq!(journal.count(SimCall::Close), 1);
}

#[test]
fn more_than_one_buffer_is_rejected() {
    let dev = sim().with_granted_buffers(4);
    let journal = dev.journal();
    let err = DeviceSession::open(dev, TIMEOUT).err().unwrap();
    assert!(matches!(err, CaptureError::BufferCount(4)));
    assert_eq!(journal.count(SimCall::RequestBuffers(0)), 1);
}

#[test]
fn teardown_failures_do_not_escalate() {
    let dev = sim()
        .fail_on(SimCall::StreamOff, SimFault::Errno(libc::EIO))
        .fail_on(SimCall::RequestBuffers(0), SimFault::Errno(libc::EBUSY));
    let journal = dev.journal();
    let mut session = DeviceSession::open(dev, TIMEOUT).unwrap();
    session.start_streaming().unwrap();

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(journal.count(SimCall::Close), 1);
}
