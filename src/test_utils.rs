//! Test utilities: in-process sources, loopback endpoints, and sample arrays
//!
//! Shared by unit tests, integration tests, and benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use std::time::Duration;
use tokio::sync::mpsc;

use crate::clock::ReferenceClock;
use crate::config::StreamConfig;
use crate::publisher::Publisher;
use crate::source::FrameSource;
use crate::subscriber::Subscriber;
use crate::transport::Endpoint;
use crate::types::{ArrayMessage, Metadata, NdArray, ReceivedArray};
use crate::Result;

/// Number of keypoints in [`sample_pose`] tensors.
pub const SAMPLE_KEYPOINTS: usize = 17;

const LOOPBACK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// [`FrameSource`] fed from an in-process channel.
///
/// Dropping every sender ends the source.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<ReceivedArray>>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<ReceivedArray>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

#[async_trait::async_trait]
impl FrameSource for ChannelSource {
    async fn recv_frame(&mut self) -> Result<Option<ReceivedArray>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

/// `(K, 3)` float32 pose tensor from `(x, y, confidence)` triples.
pub fn pose_tensor(keypoints: &[(f32, f32, f32)]) -> NdArray {
    let values: Vec<f32> = keypoints.iter().flat_map(|&(x, y, c)| [x, y, c]).collect();
    NdArray::from_elements(vec![keypoints.len(), 3], &values)
        .expect("pose tensor length matches its shape")
}

/// `(height, width, 3)` uint8 frame with a horizontal gradient.
pub fn sample_frame(width: usize, height: usize) -> NdArray {
    let mut pixels = Vec::with_capacity(width * height * 3);
    for _ in 0..height {
        for x in 0..width {
            let shade = (x * 255 / width.max(1)) as u8;
            pixels.extend_from_slice(&[shade, shade / 2, 255 - shade]);
        }
    }
    NdArray::new(crate::types::DType::UInt8, vec![height, width, 3], pixels)
        .expect("frame length matches its shape")
}

/// A received pose frame with fixed clocks.
///
/// The stage started 10 ms before `time_send`; receipt is 5 ms after it.
pub fn sample_pose(confidence: f32, time_send: f64) -> ReceivedArray {
    let clock = ReferenceClock::utc();
    let keypoints: Vec<_> =
        (0..SAMPLE_KEYPOINTS).map(|i| (10.0 * i as f32, 5.0 * i as f32, confidence)).collect();
    let metadata = Metadata::Pose { time_send, time_start_pose_process: time_send - 0.010 };
    let message = ArrayMessage::new(pose_tensor(&keypoints), metadata, &clock)
        .expect("pose metadata is valid");
    let received_at = clock.from_unix_seconds(time_send + 0.005).expect("finite receipt time");
    ReceivedArray::new(message, received_at)
}

/// Config for a loopback deployment on an ephemeral port.
pub fn loopback_config() -> StreamConfig {
    StreamConfig { host: "127.0.0.1".to_string(), port: 0, ..StreamConfig::default() }
}

/// A bound publisher and a subscriber connected to it, subscribed to
/// everything, with the connection already registered on the publisher side.
pub async fn loopback_pair(config: &StreamConfig) -> Result<(Publisher, Subscriber)> {
    let mut publisher = Publisher::new(config)?;
    publisher.bind(&Endpoint::new(config.host.clone(), config.port)).await?;
    let port = publisher.local_addr()?.port();

    let mut subscriber = Subscriber::new(config)?;
    subscriber.connect(&Endpoint::new(config.host.clone(), port)).await?;
    subscriber.subscribe("");

    publisher.wait_for_subscribers(1, LOOPBACK_JOIN_TIMEOUT).await?;
    Ok((publisher, subscriber))
}
