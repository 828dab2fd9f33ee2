//! Renderers: where displayed frames end up
//!
//! The display loop hands every new frame to a [`FrameRenderer`]. Window
//! toolkits and encoders live outside the crate; they plug in through this
//! trait, a closure, or [`RawPipeRenderer`] for an encoder reading raw frames
//! on stdin.

use std::io::Write;
use tracing::{debug, info};

use crate::latency::LatencyTracker;
use crate::types::ReceivedArray;
use crate::{Result, StreamError};

/// What the display loop should do after a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderControl {
    #[default]
    Continue,
    /// Stop the whole pipeline (e.g. the user closed the window).
    Quit,
}

/// Consumer of displayed frames.
///
/// Errors are logged by the display loop and cost only the current frame.
pub trait FrameRenderer {
    /// Render one frame; `rate` is the display loop's current iterations/s.
    fn render(&mut self, frame: &ReceivedArray, rate: f64) -> Result<RenderControl>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> FrameRenderer for F
where
    F: FnMut(&ReceivedArray, f64) -> Result<RenderControl>,
{
    fn render(&mut self, frame: &ReceivedArray, rate: f64) -> Result<RenderControl> {
        self(frame, rate)
    }
}

/// Writes each frame's raw bytes to a pipe, e.g. an encoder's stdin.
///
/// The encoder must be told the frame geometry and pixel format out of band
/// (`-f rawvideo -pix_fmt rgb24 -s WxH` for ffmpeg).
pub struct RawPipeRenderer<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> RawPipeRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Frames written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameRenderer for RawPipeRenderer<W> {
    fn render(&mut self, frame: &ReceivedArray, _rate: f64) -> Result<RenderControl> {
        self.writer
            .write_all(frame.array().data())
            .map_err(|e| StreamError::render(format!("writing frame to pipe: {e}")))?;
        self.written += 1;
        Ok(RenderControl::Continue)
    }

    fn finish(&mut self) -> Result<()> {
        debug!(frames = self.written, "Flushing raw pipe");
        self.writer.flush().map_err(|e| StreamError::render(format!("flushing pipe: {e}")))
    }
}

/// Logs a line per frame with shape, rate and latency.
#[derive(Debug, Clone)]
pub struct LogRenderer {
    every: u64,
    seen: u64,
}

impl Default for LogRenderer {
    fn default() -> Self {
        Self::every(1)
    }
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log only every `n`th frame.
    pub fn every(n: u64) -> Self {
        Self { every: n.max(1), seen: 0 }
    }
}

impl FrameRenderer for LogRenderer {
    fn render(&mut self, frame: &ReceivedArray, rate: f64) -> Result<RenderControl> {
        self.seen += 1;
        if (self.seen - 1) % self.every == 0 {
            let report = LatencyTracker::measure(&frame.timestamps());
            info!(
                shape = ?frame.array().shape(),
                dtype = %frame.array().dtype(),
                rate,
                latency_ms = report.producer_to_receiver * 1000.0,
                stage_latency_ms = ?report.stage_to_receiver.map(|s| s * 1000.0),
                "Frame {}", self.seen
            );
        }
        Ok(RenderControl::Continue)
    }
}
