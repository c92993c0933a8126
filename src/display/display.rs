//! SDL2 Window Display Module
//! Presents RGB24 frames in a window. The vsync-paced event loop is the
//! scheduler that triggers one capture step per refresh.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use crate::capture::RgbFrame;
use crate::pipeline::{Flow, FrameSink, FrameSource, StepRunner};
use crate::DisplayConfig;

/// SDL2 Window Display
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;
        let scale = config.scale.max(1);

        let window = video_subsystem
            .window(&config.title, width * scale, height * scale)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            width,
            height,
        })
    }

    /// Pump window events and run one capture step per refresh until the
    /// window closes or the source stops.
    pub fn run<S: FrameSource + ?Sized>(
        &mut self,
        sdl_context: &sdl2::Sdl,
        source: &mut S,
        runner: &mut StepRunner,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let abort = source.abort_handle();

        // The first capture can block for up to the dequeue timeout.
        self.present(&RgbFrame::placeholder(self.width, self.height))?;

        loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        abort.abort();
                    }
                    _ => {}
                }
            }

            if runner.tick(source, self)? == Flow::Stop {
                break;
            }
        }

        Ok(())
    }
}

impl FrameSink for Sdl2Display {
    fn present(&mut self, frame: &RgbFrame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(eyre!(
                "frame is {}x{}, window expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, self.width, self.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, frame.stride())
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }
}
