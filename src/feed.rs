//! Frame feed: a lazy, non-restartable stream of received arrays
//!
//! A [`FrameFeed`] owns its [`FrameSource`] and performs one receive per pull.
//! Every delivered frame passes through a [`LatencyTracker`]. Malformed
//! messages are logged and skipped; any other error, or the source ending,
//! terminates the feed for good and drops the source (closing its connection).
//! Reconnecting means building a new source and a new feed.

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, info, trace, warn};

use crate::latency::{LatencySummary, LatencyTracker};
use crate::source::FrameSource;
use crate::stream::{Throttle, ThrottleExt};
use crate::types::{ReceivedArray, UpdateRate};
use crate::{Result, StreamError};

type Receiving<S> = BoxFuture<'static, (Box<S>, Result<Option<ReceivedArray>>)>;

enum FeedState<S> {
    Idle(Box<S>),
    // The in-flight receive owns the source; it survives a dropped `next()`.
    Receiving(Receiving<S>),
    Done,
}

/// Stream of arrays pulled from a [`FrameSource`].
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use posewire::{FrameFeed, StreamConfig, Subscriber};
///
/// # #[tokio::main]
/// # async fn main() -> posewire::Result<()> {
/// let config = StreamConfig::default();
/// let mut subscriber = Subscriber::new(&config)?;
/// subscriber.connect(&config.subscriber_endpoint()).await?;
/// subscriber.subscribe("");
///
/// let mut feed = FrameFeed::new(subscriber);
/// while let Some(frame) = feed.next().await {
///     println!("{:?}", frame.array().shape());
/// }
/// if let Some(reason) = feed.termination() {
///     eprintln!("feed ended: {reason}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct FrameFeed<S> {
    state: FeedState<S>,
    tracker: LatencyTracker,
    termination: Option<StreamError>,
    delivered: u64,
    discarded: u64,
}

impl<S: FrameSource> FrameFeed<S> {
    pub fn new(source: S) -> Self {
        debug!(source = %source.describe(), "Frame feed created");
        Self {
            state: FeedState::Idle(Box::new(source)),
            tracker: LatencyTracker::new(),
            termination: None,
            delivered: 0,
            discarded: 0,
        }
    }

    /// Pull the next frame as a `(success, frame)` pair.
    ///
    /// `success` is false exactly when the feed has terminated.
    pub async fn grab(&mut self) -> (bool, Option<ReceivedArray>) {
        match self.next().await {
            Some(frame) => (true, Some(frame)),
            None => (false, None),
        }
    }

    /// Apply a rate limit, keeping the latest frame of each interval.
    pub fn with_rate(self, rate: UpdateRate) -> RatedFeed<S> {
        match rate.throttle_interval() {
            Some(interval) => {
                debug!(?interval, "Throttling frame feed");
                RatedFeed::Throttled(self.throttle(interval))
            }
            None => RatedFeed::Native(self),
        }
    }

    /// Why the feed ended, if it ended on an error.
    pub fn termination(&self) -> Option<&StreamError> {
        self.termination.as_ref()
    }

    pub fn take_termination(&mut self) -> Option<StreamError> {
        self.termination.take()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, FeedState::Done)
    }

    pub fn latency_summary(&self) -> &LatencySummary {
        self.tracker.summary()
    }

    /// Frames yielded so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Malformed messages skipped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn observe(&mut self, frame: &ReceivedArray) {
        self.delivered += 1;
        let report = self.tracker.record(&frame.timestamps());
        if report.clock_skew_suspected() {
            warn!(
                producer_to_receiver = report.producer_to_receiver,
                stage_to_receiver = ?report.stage_to_receiver,
                "Negative latency, producer and receiver clocks disagree"
            );
        } else {
            trace!(
                frame = self.delivered,
                latency_ms = report.producer_to_receiver * 1000.0,
                "Frame received"
            );
        }
    }

    fn finish(&mut self, termination: Option<StreamError>) {
        match &termination {
            Some(e) => info!("Frame feed terminated after {} frames: {}", self.delivered, e),
            None => info!("Frame source ended after {} frames", self.delivered),
        }
        self.termination = termination;
        self.state = FeedState::Done;
    }
}

impl<S: FrameSource> Stream for FrameFeed<S> {
    type Item = ReceivedArray;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ReceivedArray>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, FeedState::Done) {
                FeedState::Idle(mut source) => {
                    this.state = FeedState::Receiving(
                        async move {
                            let result = source.recv_frame().await;
                            (source, result)
                        }
                        .boxed(),
                    );
                }
                FeedState::Receiving(mut receiving) => {
                    let (source, result) = match receiving.poll_unpin(cx) {
                        Poll::Ready(done) => done,
                        Poll::Pending => {
                            this.state = FeedState::Receiving(receiving);
                            return Poll::Pending;
                        }
                    };

                    match result {
                        Ok(Some(frame)) => {
                            this.state = FeedState::Idle(source);
                            this.observe(&frame);
                            return Poll::Ready(Some(frame));
                        }
                        Ok(None) => {
                            this.finish(None);
                            return Poll::Ready(None);
                        }
                        Err(e @ StreamError::MalformedMessage { .. }) => {
                            this.discarded += 1;
                            warn!("Discarding malformed message: {}", e);
                            this.state = FeedState::Idle(source);
                        }
                        Err(e) => {
                            this.finish(Some(e));
                            return Poll::Ready(None);
                        }
                    }
                }
                FeedState::Done => return Poll::Ready(None),
            }
        }
    }
}

/// A [`FrameFeed`] with an optional rate limit applied.
pub enum RatedFeed<S: FrameSource> {
    Native(FrameFeed<S>),
    Throttled(Throttle<FrameFeed<S>>),
}

impl<S: FrameSource> RatedFeed<S> {
    /// The underlying feed, for statistics and termination.
    pub fn feed(&self) -> &FrameFeed<S> {
        match self {
            RatedFeed::Native(feed) => feed,
            RatedFeed::Throttled(throttled) => throttled.get_ref(),
        }
    }

    pub fn into_feed(self) -> FrameFeed<S> {
        match self {
            RatedFeed::Native(feed) => feed,
            RatedFeed::Throttled(throttled) => throttled.into_inner(),
        }
    }
}

impl<S: FrameSource> Stream for RatedFeed<S> {
    type Item = ReceivedArray;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ReceivedArray>> {
        match self.get_mut() {
            RatedFeed::Native(feed) => feed.poll_next_unpin(cx),
            RatedFeed::Throttled(throttled) => throttled.poll_next_unpin(cx),
        }
    }
}
