//! Acquisition worker: pulls frames from a feed into the frame buffer

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::buffer::BufferWriter;
use crate::feed::RatedFeed;
use crate::source::FrameSource;
use crate::{Result, StreamError};

/// What the acquisition task hands back when it ends.
pub struct AcquisitionOutcome<S: FrameSource> {
    /// The feed, kept for its latency statistics and termination reason.
    pub feed: RatedFeed<S>,
    pub acquired: u64,
}

/// Tokio task that keeps the frame buffer filled with the newest frame.
pub struct AcquisitionWorker<S: FrameSource> {
    handle: JoinHandle<AcquisitionOutcome<S>>,
    stop: CancellationToken,
}

impl<S: FrameSource> AcquisitionWorker<S> {
    /// Spawn the worker on the current runtime.
    ///
    /// The worker stops when the feed terminates or the buffer's stop signal is
    /// set, and sets that signal on its way out.
    pub fn spawn(feed: RatedFeed<S>, writer: BufferWriter) -> Self {
        let stop = writer.stop_token();
        let handle = tokio::spawn(acquire(feed, writer));
        Self { handle, stop }
    }

    /// Request a cooperative stop; an in-flight receive is abandoned.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) -> Result<AcquisitionOutcome<S>> {
        self.handle
            .await
            .map_err(|e| StreamError::worker(format!("acquisition task failed: {e}")))
    }
}

/// Pull frames until the feed ends or stop is requested.
pub(crate) async fn acquire<S: FrameSource>(
    mut feed: RatedFeed<S>,
    mut writer: BufferWriter,
) -> AcquisitionOutcome<S> {
    let stop = writer.stop_token();
    info!("Acquisition started");

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Acquisition stop requested");
                break;
            }
            next = feed.next() => next,
        };

        match next {
            Some(frame) => writer.write(frame),
            None => {
                info!("Feed ended, stopping pipeline");
                break;
            }
        }
    }

    writer.stop();
    let acquired = writer.written();
    info!(acquired, "Acquisition ended");
    AcquisitionOutcome { feed, acquired }
}
