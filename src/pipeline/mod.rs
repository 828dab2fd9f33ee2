//! Acquisition/display pipeline
//!
//! Decouples receiving frames from rendering them. Acquisition pulls from a
//! [`FrameFeed`] into a latest-wins [`buffer`]; display renders whatever is
//! newest, so a slow renderer drops frames instead of building a backlog.
//!
//! | mode         | acquisition          | display              |
//! |--------------|----------------------|----------------------|
//! | `sequential` | caller task          | caller task          |
//! | `get`        | dedicated tokio task | caller task          |
//! | `show`       | caller task          | dedicated OS thread  |
//! | `both`       | dedicated tokio task | dedicated OS thread  |
//!
//! The pipeline ends when the feed terminates, when the renderer returns
//! [`RenderControl::Quit`], or when its stop token is cancelled.

pub mod acquisition;
pub mod buffer;
pub mod display;
pub mod rate;

pub use acquisition::{AcquisitionOutcome, AcquisitionWorker};
pub use buffer::{BufferReader, BufferWriter, frame_buffer, frame_buffer_with_stop};
pub use display::{DisplayStats, DisplayWorker};
pub use rate::RateCounter;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StreamConfig;
use crate::feed::{FrameFeed, RatedFeed};
use crate::latency::LatencySummary;
use crate::render::{FrameRenderer, RenderControl};
use crate::source::FrameSource;
use crate::types::UpdateRate;
use crate::{Result, StreamError};

/// Which pipeline stages get their own worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadMode {
    /// Receive and render in one loop
    Sequential,
    /// Dedicated acquisition; the caller renders
    Get,
    /// Dedicated display; the caller acquires
    Show,
    /// Dedicated acquisition and display sharing the frame buffer
    #[default]
    Both,
}

impl ThreadMode {
    pub fn dedicated_acquisition(self) -> bool {
        matches!(self, ThreadMode::Get | ThreadMode::Both)
    }

    pub fn dedicated_display(self) -> bool {
        matches!(self, ThreadMode::Show | ThreadMode::Both)
    }
}

/// Summary of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub mode: ThreadMode,
    /// Frames written to the buffer (or pulled, in sequential mode)
    pub acquired: u64,
    /// Frames the feed yielded before any rate limiting
    pub delivered: u64,
    /// Malformed messages the feed skipped
    pub discarded: u64,
    pub rendered: u64,
    pub render_failures: u64,
    /// Display iterations per second
    pub rate: f64,
    pub quit_requested: bool,
    pub latency: LatencySummary,
    /// The error that ended the feed, if any
    pub termination: Option<StreamError>,
}

/// Runs a feed through a renderer in one of the [`ThreadMode`]s.
///
/// # Example
///
/// ```rust,no_run
/// use posewire::{FrameFeed, LogRenderer, Pipeline, StreamConfig, Subscriber};
///
/// # #[tokio::main]
/// # async fn main() -> posewire::Result<()> {
/// let config = StreamConfig::default();
/// let mut subscriber = Subscriber::new(&config)?;
/// subscriber.connect(&config.subscriber_endpoint()).await?;
/// subscriber.subscribe("");
///
/// let (report, _renderer) = Pipeline::from_config(&config)
///     .run(FrameFeed::new(subscriber), LogRenderer::every(30))
///     .await?;
/// println!("rendered {} frames at {:.1}/s", report.rendered, report.rate);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    mode: ThreadMode,
    update_rate: UpdateRate,
    idle: Duration,
    stop: CancellationToken,
}

impl Pipeline {
    pub fn new(mode: ThreadMode) -> Self {
        Self {
            mode,
            update_rate: UpdateRate::Native,
            idle: Duration::from_millis(1),
            stop: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.thread_mode)
            .with_update_rate(config.update_rate)
            .with_idle(config.display_poll())
    }

    pub fn with_update_rate(mut self, rate: UpdateRate) -> Self {
        self.update_rate = rate;
        self
    }

    /// Sleep of the display loop when no new frame is buffered.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn mode(&self) -> ThreadMode {
        self.mode
    }

    /// Token that stops the pipeline when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run until the feed ends, the renderer quits, or stop is requested.
    ///
    /// Returns the report and the renderer.
    pub async fn run<S, R>(self, feed: FrameFeed<S>, renderer: R) -> Result<(PipelineReport, R)>
    where
        S: FrameSource,
        R: FrameRenderer + Send + 'static,
    {
        info!(mode = ?self.mode, rate = ?self.update_rate, "Pipeline starting");
        let feed = feed.with_rate(self.update_rate);
        let buffer = || frame_buffer_with_stop(self.stop.clone());

        let (outcome, stats, renderer) = match self.mode {
            ThreadMode::Sequential => self.run_sequential(feed, renderer).await,
            ThreadMode::Get => {
                let (writer, reader) = buffer();
                let worker = AcquisitionWorker::spawn(feed, writer);
                let (stats, renderer) = render_in_task(reader, renderer).await;
                (worker.join().await?, stats, renderer)
            }
            ThreadMode::Show => {
                let (writer, reader) = buffer();
                let display = DisplayWorker::spawn(reader, renderer, self.idle)?;
                let outcome = acquisition::acquire(feed, writer).await;
                let (renderer, stats) = join_display(display).await?;
                (outcome, stats, renderer)
            }
            ThreadMode::Both => {
                let (writer, reader) = buffer();
                let display = DisplayWorker::spawn(reader, renderer, self.idle)?;
                let worker = AcquisitionWorker::spawn(feed, writer);
                let outcome = worker.join().await?;
                let (renderer, stats) = join_display(display).await?;
                (outcome, stats, renderer)
            }
        };

        let mut feed = outcome.feed.into_feed();
        let report = PipelineReport {
            mode: self.mode,
            acquired: outcome.acquired,
            delivered: feed.delivered(),
            discarded: feed.discarded(),
            rendered: stats.rendered,
            render_failures: stats.render_failures,
            rate: stats.rate,
            quit_requested: stats.quit_requested,
            latency: feed.latency_summary().clone(),
            termination: feed.take_termination(),
        };
        info!(
            acquired = report.acquired,
            rendered = report.rendered,
            render_failures = report.render_failures,
            "Pipeline finished"
        );
        Ok((report, renderer))
    }

    async fn run_sequential<S, R>(
        &self,
        mut feed: RatedFeed<S>,
        mut renderer: R,
    ) -> (AcquisitionOutcome<S>, DisplayStats, R)
    where
        S: FrameSource,
        R: FrameRenderer,
    {
        let mut counter = RateCounter::new();
        counter.start();
        let mut stats = DisplayStats::default();
        let mut acquired = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                next = feed.next() => next,
            };
            let Some(frame) = next else { break };
            acquired += 1;

            let control = display::render_frame(&mut renderer, &frame, &mut counter, &mut stats);
            if control == RenderControl::Quit {
                self.stop.cancel();
                break;
            }
        }

        display::finish_rendering(&mut renderer, &counter, &mut stats);
        (AcquisitionOutcome { feed, acquired }, stats, renderer)
    }
}

/// Render on the calling task until the buffer stops.
async fn render_in_task<R: FrameRenderer>(mut reader: BufferReader, mut renderer: R) -> (DisplayStats, R) {
    let mut counter = RateCounter::new();
    counter.start();
    let mut stats = DisplayStats::default();

    while let Some(frame) = reader.wait_new().await {
        if display::render_frame(&mut renderer, &frame, &mut counter, &mut stats) == RenderControl::Quit {
            reader.stop();
        }
    }

    display::finish_rendering(&mut renderer, &counter, &mut stats);
    (stats, renderer)
}

async fn join_display<R>(display: DisplayWorker<R>) -> Result<(R, DisplayStats)>
where
    R: FrameRenderer + Send + 'static,
{
    tokio::task::spawn_blocking(move || display.join())
        .await
        .map_err(|e| StreamError::worker(format!("joining display thread: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ChannelSource, sample_pose};
    use crate::types::ReceivedArray;

    fn queued_feed(frames: u32) -> FrameFeed<ChannelSource> {
        let (source, tx) = ChannelSource::new();
        for i in 0..frames {
            tx.send(Ok(sample_pose(0.9, 100.0 + f64::from(i)))).unwrap();
        }
        FrameFeed::new(source)
    }

    fn counting_renderer() -> impl FnMut(&ReceivedArray, f64) -> Result<RenderControl> + Send + 'static {
        |_: &ReceivedArray, _: f64| Ok::<_, StreamError>(RenderControl::Continue)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sequential_mode_renders_every_frame() {
        let _ = tracing_subscriber::fmt::try_init();
        let (report, _) = Pipeline::new(ThreadMode::Sequential)
            .run(queued_feed(4), counting_renderer())
            .await
            .unwrap();

        assert_eq!(report.acquired, 4);
        assert_eq!(report.rendered, 4);
        assert_eq!(report.latency.producer_to_receiver.count, 4);
        assert!(report.termination.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_mode_finishes_when_the_feed_ends() {
        for mode in [ThreadMode::Sequential, ThreadMode::Get, ThreadMode::Show, ThreadMode::Both] {
            let (report, _) = Pipeline::new(mode).run(queued_feed(3), counting_renderer()).await.unwrap();

            assert_eq!(report.mode, mode);
            assert_eq!(report.acquired, 3, "{mode:?}");
            assert_eq!(report.delivered, 3, "{mode:?}");
            // Latest-wins: threaded modes may skip frames but never invent them.
            assert!(report.rendered <= 3, "{mode:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn quit_stops_a_live_feed() {
        let (source, tx) = ChannelSource::new();
        tx.send(Ok(sample_pose(0.9, 100.0))).unwrap();
        let renderer = |_: &ReceivedArray, _: f64| Ok::<_, StreamError>(RenderControl::Quit);

        let (report, _) = Pipeline::new(ThreadMode::Both)
            .run(FrameFeed::new(source), renderer)
            .await
            .unwrap();

        assert!(report.quit_requested);
        assert_eq!(report.rendered, 1);
        drop(tx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_token_ends_an_idle_pipeline() {
        let (source, _tx) = ChannelSource::new();
        let pipeline = Pipeline::new(ThreadMode::Both);
        let stop = pipeline.stop_token();

        let run = tokio::spawn(pipeline.run(FrameFeed::new(source), counting_renderer()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();

        let (report, _) = run.await.unwrap().unwrap();
        assert_eq!(report.acquired, 0);
        assert_eq!(report.rendered, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn acquisition_stop_mid_render_ends_display_after_that_render() {
        let _ = tracing_subscriber::fmt::try_init();
        let (source, tx) = ChannelSource::new();
        let (writer, reader) = frame_buffer();
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

        let renderer = move |_: &ReceivedArray, _: f64| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(200));
            Ok::<_, StreamError>(RenderControl::Continue)
        };
        let display = DisplayWorker::spawn(reader, renderer, Duration::from_millis(1)).unwrap();
        let acquisition =
            AcquisitionWorker::spawn(FrameFeed::new(source).with_rate(UpdateRate::Native), writer);

        tx.send(Ok(sample_pose(0.9, 100.0))).unwrap();
        started_rx.recv().await.unwrap();

        // Both of these land while the first render is still sleeping.
        tx.send(Ok(sample_pose(0.9, 101.0))).unwrap();
        acquisition.stop();
        let stop_requested = std::time::Instant::now();

        let outcome = acquisition.join().await.unwrap();
        let (_, stats) = join_display(display).await.unwrap();

        assert!(outcome.acquired >= 1);
        assert_eq!(stats.rendered, 1);
        assert!(stop_requested.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn modes_parse_from_yaml() {
        let mode: ThreadMode = serde_yaml_ng::from_str("show").unwrap();
        assert_eq!(mode, ThreadMode::Show);
        assert!(mode.dedicated_display());
        assert!(!mode.dedicated_acquisition());
    }
}
