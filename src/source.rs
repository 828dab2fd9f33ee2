//! Source and sink traits for array streams

use crate::types::{Metadata, NdArray, ReceivedArray};
use crate::Result;

/// Trait for array sources
///
/// Sources abstract over where decoded arrays come from (a network subscriber,
/// an in-process channel in tests) and handle their own waiting internally.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Receive the next array
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New array available
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Error occurred; `MalformedMessage` only affects this message
    async fn recv_frame(&mut self) -> Result<Option<ReceivedArray>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Trait for array sinks
///
/// Sends are fire-and-forget: a sink never waits for consumers.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, array: &NdArray, metadata: &Metadata) -> Result<()>;
}
