//! Pub/sub streaming of time-stamped arrays with end-to-end latency accounting.
//!
//! Posewire moves video frames and pose-keypoint tensors from a producer to any
//! number of subscribers and measures how long each one took to arrive across
//! three clocks: when it was produced, when an earlier stage (pose inference)
//! started, and when it was received.
//!
//! # Features
//!
//! - **Wire codec**: JSON header (`dtype`, `shape`, timestamps) plus raw payload
//! - **Pub/sub over TCP**: fire-and-forget broadcast, per-subscriber queues
//! - **Frame feeds**: `Stream`s of decoded arrays with latency tracking
//! - **Pipelines**: latest-wins acquisition/display decoupling in four modes
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use posewire::{Posewire, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> posewire::Result<()> {
//!     let config = StreamConfig::from_file("posewire.yaml")?;
//!     let mut feed = Posewire::feed(&config).await?;
//!
//!     while let Some(frame) = feed.next().await {
//!         let latency = frame.t_received - frame.message.t_produced;
//!         println!("{:?} after {:.1} ms", frame.array().shape(), latency * 1000.0);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod clock;
pub mod codec;
pub mod config;
mod error;
pub mod latency;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Transport and endpoints
pub mod publisher;
pub mod source;
pub mod subscriber;
pub mod transport;

// Consumption
pub mod feed;
pub mod overlay;
pub mod pipeline;
pub mod render;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

pub use clock::ReferenceClock;
pub use codec::{ArrayCodec, EncodedMessage};
pub use config::StreamConfig;
pub use latency::{LatencyReport, LatencySummary, LatencyTracker, Timestamps};
pub use transport::Endpoint;

// Main API exports
pub use feed::{FrameFeed, RatedFeed};
pub use pipeline::{Pipeline, PipelineReport, ThreadMode};
pub use publisher::Publisher;
pub use render::{FrameRenderer, LogRenderer, RawPipeRenderer, RenderControl};
pub use source::{FrameSink, FrameSource};
pub use subscriber::Subscriber;

/// Unified entry point for configured endpoints.
///
/// # Examples
///
/// ## Publishing
/// ```rust,no_run
/// use posewire::{NdArray, Posewire, StreamConfig};
///
/// #[tokio::main]
/// async fn main() -> posewire::Result<()> {
///     let publisher = Posewire::publish(&StreamConfig::default()).await?;
///     let frame = NdArray::zeros(posewire::DType::UInt8, vec![480, 640, 3])?;
///     publisher.send_image(&frame)?;
///     Ok(())
/// }
/// ```
///
/// ## Subscribing
/// ```rust,no_run
/// use posewire::{Posewire, StreamConfig};
///
/// #[tokio::main]
/// async fn main() -> posewire::Result<()> {
///     let mut subscriber = Posewire::subscribe(&StreamConfig::default()).await?;
///     let frame = subscriber.recv().await?;
///     println!("received {:?}", frame.array().shape());
///     Ok(())
/// }
/// ```
pub struct Posewire;

impl Posewire {
    /// Bind a publisher on the configured port, on every interface.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The port is already in use
    pub async fn publish(config: &StreamConfig) -> Result<Publisher> {
        let mut publisher = Publisher::new(config)?;
        publisher.bind(&config.publisher_endpoint()).await?;
        Ok(publisher)
    }

    /// Connect a subscriber to the configured host and subscribe to everything.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The publisher cannot be reached
    pub async fn subscribe(config: &StreamConfig) -> Result<Subscriber> {
        let mut subscriber = Subscriber::new(config)?;
        subscriber.connect(&config.subscriber_endpoint()).await?;
        subscriber.subscribe("");
        Ok(subscriber)
    }

    /// Connect a subscriber and wrap it in a frame feed.
    pub async fn feed(config: &StreamConfig) -> Result<FrameFeed<Subscriber>> {
        Ok(FrameFeed::new(Self::subscribe(config).await?))
    }
}
