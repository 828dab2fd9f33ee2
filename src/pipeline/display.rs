//! Display worker: renders the newest buffered frame on its own thread

use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::buffer::BufferReader;
use super::rate::RateCounter;
use crate::render::{FrameRenderer, RenderControl};
use crate::types::ReceivedArray;
use crate::{Result, StreamError};

const THREAD_NAME: &str = "posewire-display";

/// Counters of one display run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayStats {
    /// Frames the renderer accepted
    pub rendered: u64,
    pub render_failures: u64,
    /// Render attempts per second over the whole run
    pub rate: f64,
    /// Whether the renderer asked to quit
    pub quit_requested: bool,
}

/// Dedicated OS thread running the display loop.
pub struct DisplayWorker<R> {
    handle: JoinHandle<(R, DisplayStats)>,
    reader_stop: tokio_util::sync::CancellationToken,
}

impl<R> DisplayWorker<R>
where
    R: FrameRenderer + Send + 'static,
{
    /// Start the display thread.
    ///
    /// `idle` is how long the loop sleeps when no new frame is available.
    pub fn spawn(reader: BufferReader, renderer: R, idle: Duration) -> Result<Self> {
        let reader_stop = reader.stop_token();
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let mut renderer = renderer;
                let stats = display_loop(reader, &mut renderer, idle);
                (renderer, stats)
            })
            .map_err(|e| StreamError::io("spawning display thread", e))?;
        Ok(Self { handle, reader_stop })
    }

    /// Request stop; the loop exits after its current render.
    pub fn stop(&self) {
        self.reader_stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the thread exits, returning the renderer and its counters.
    pub fn join(self) -> Result<(R, DisplayStats)> {
        self.handle
            .join()
            .map_err(|_| StreamError::worker("display thread panicked"))
    }
}

/// Render new frames until the buffer is stopped.
///
/// Stop is observed once per iteration, after the current render. Renderer
/// errors are logged and counted, never propagated.
pub fn display_loop<R: FrameRenderer + ?Sized>(
    mut reader: BufferReader,
    renderer: &mut R,
    idle: Duration,
) -> DisplayStats {
    let mut counter = RateCounter::new();
    counter.start();
    let mut stats = DisplayStats::default();
    info!("Display started");

    while !reader.is_stopped() {
        let Some(frame) = reader.take_new() else {
            std::thread::sleep(idle);
            continue;
        };

        if render_frame(renderer, &frame, &mut counter, &mut stats) == RenderControl::Quit {
            reader.stop();
        }
    }

    finish_rendering(renderer, &counter, &mut stats);
    stats
}

/// Render one frame, folding the outcome into `stats`.
pub(crate) fn render_frame<R: FrameRenderer + ?Sized>(
    renderer: &mut R,
    frame: &ReceivedArray,
    counter: &mut RateCounter,
    stats: &mut DisplayStats,
) -> RenderControl {
    let control = match renderer.render(frame, counter.rate()) {
        Ok(control) => {
            stats.rendered += 1;
            control
        }
        Err(e) => {
            stats.render_failures += 1;
            warn!("Render failed, frame dropped: {}", e);
            RenderControl::Continue
        }
    };
    counter.increment();

    if control == RenderControl::Quit {
        stats.quit_requested = true;
        info!("Renderer requested quit");
    }
    control
}

pub(crate) fn finish_rendering<R: FrameRenderer + ?Sized>(
    renderer: &mut R,
    counter: &RateCounter,
    stats: &mut DisplayStats,
) {
    if let Err(e) = renderer.finish() {
        warn!("Renderer failed to finish: {}", e);
    }
    stats.rate = counter.rate();
    debug!(?stats, "Display ended");
}
