//! TCP transport for pub/sub messaging
//!
//! Endpoint addressing and the multipart framing shared by
//! [`Publisher`](crate::Publisher) and [`Subscriber`](crate::Subscriber).

pub mod endpoint;
pub mod frame;

pub use endpoint::{DEFAULT_PORT, Endpoint};
pub use frame::{DEFAULT_MAX_FRAME_BYTES, FrameCodec, MultipartAssembler, WireFrame};
