use std::path::Path;

use tracing::{info, warn};
use v4l::framesize::FrameSizeEnum;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::{CaptureFormat, PixelFormat};

/// Capture nodes that advertise YUYV, for pointing users at a working path.
pub fn find_yuyv_devices() -> Vec<String> {
    info!("Scanning for YUYV capture devices...");

    let mut found = Vec::new();
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        if supports_yuyv(&path) {
            found.push(path);
        }
    }
    found
}

fn supports_yuyv(path: &str) -> bool {
    let Ok(dev) = Device::with_path(path) else {
        return false;
    };
    let Ok(caps) = dev.query_caps() else {
        return false;
    };
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return false;
    }

    let yuyv = PixelFormat::Yuyv.fourcc();
    match dev.enum_formats() {
        Ok(formats) => formats.iter().any(|fmt| {
            let hit = fmt.fourcc.repr == yuyv;
            if hit {
                info!("Found YUYV device: {} - {}", path, caps.card);
            }
            hit
        }),
        Err(e) => {
            warn!("Format enumeration on {} failed: {}", path, e);
            false
        }
    }
}

/// Log whether `path` lists the fixed capture size among its YUYV frame sizes.
pub fn describe_device(path: &str) {
    let Ok(dev) = Device::with_path(path) else {
        return;
    };
    let wanted = CaptureFormat::VGA_YUYV;
    let fourcc = v4l::FourCC::new(&wanted.pixel_format.fourcc());
    match dev.enum_framesizes(fourcc) {
        Ok(sizes) => {
            let (w, h) = (wanted.width, wanted.height);
            let listed = sizes.iter().any(|size| match &size.size {
                FrameSizeEnum::Discrete(d) => d.width == w && d.height == h,
                FrameSizeEnum::Stepwise(s) => {
                    (s.min_width..=s.max_width).contains(&w)
                        && (s.min_height..=s.max_height).contains(&h)
                }
            });
            if listed {
                info!("{} lists {}", path, wanted);
            } else {
                warn!("{} does not list {}; format negotiation may fail", path, wanted);
            }
        }
        Err(e) => warn!("Frame size enumeration on {} failed: {}", path, e),
    }
}
