//! Subscriber: receives and decodes arrays from a publisher

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace};

use crate::codec::ArrayCodec;
use crate::config::StreamConfig;
use crate::source::FrameSource;
use crate::transport::{Endpoint, FrameCodec, MultipartAssembler};
use crate::types::ReceivedArray;
use crate::{Result, StreamError};

/// Receiving endpoint for arrays.
///
/// A subscriber receives nothing until it subscribes to at least one topic
/// filter; the empty filter matches every message.
///
/// # Example
///
/// ```rust,no_run
/// use posewire::{StreamConfig, Subscriber};
///
/// # #[tokio::main]
/// # async fn main() -> posewire::Result<()> {
/// let config = StreamConfig::default();
/// let mut subscriber = Subscriber::new(&config)?;
/// subscriber.connect(&config.subscriber_endpoint()).await?;
/// subscriber.subscribe("");
///
/// let frame = subscriber.recv().await?;
/// println!("{:?} received at {}", frame.array().shape(), frame.received_at);
/// # Ok(())
/// # }
/// ```
pub struct Subscriber {
    codec: ArrayCodec,
    frame_codec: FrameCodec,
    recv_timeout: Option<Duration>,
    filters: Vec<Bytes>,
    state: SubscriberState,
}

enum SubscriberState {
    Disconnected,
    Connected(Connection),
    Closed,
}

struct Connection {
    endpoint: Endpoint,
    frames: FramedRead<TcpStream, FrameCodec>,
    // Parts of a message whose later frames have not arrived yet. Kept here so
    // a timed-out receive resumes mid-message.
    assembler: MultipartAssembler,
}

impl Connection {
    async fn next_message(&mut self) -> Result<Vec<Bytes>> {
        loop {
            match self.frames.next().await {
                Some(Ok(frame)) => {
                    if let Some(parts) = self.assembler.push(frame)? {
                        return Ok(parts);
                    }
                }
                // A failed socket read leaves nothing to resume from.
                Some(Err(StreamError::Io { context, source })) => {
                    return Err(StreamError::connection_closed_with_source(
                        format!("{context} on {} failed", self.endpoint),
                        Box::new(source),
                    ));
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(StreamError::connection_closed(format!(
                        "publisher at {} closed the connection",
                        self.endpoint
                    )));
                }
            }
        }
    }
}

impl Subscriber {
    /// Create a disconnected subscriber.
    pub fn new(config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codec: config.codec()?,
            frame_codec: FrameCodec::new(config.max_frame_bytes),
            recv_timeout: config.recv_timeout(),
            filters: Vec::new(),
            state: SubscriberState::Disconnected,
        })
    }

    /// Connect to a publisher.
    pub async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        match &self.state {
            SubscriberState::Disconnected => {}
            SubscriberState::Connected(connection) => {
                return Err(StreamError::AlreadyBound {
                    endpoint: connection.endpoint.to_string(),
                });
            }
            SubscriberState::Closed => {
                return Err(StreamError::connection_closed("subscriber was closed"));
            }
        }

        let address = endpoint.connect_address()?;
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| StreamError::io(format!("connecting to {endpoint}"), e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%endpoint, "Failed to set TCP_NODELAY: {}", e);
        }

        info!(%endpoint, schema = ?self.codec.schema(), "Subscriber connected");
        self.state = SubscriberState::Connected(Connection {
            endpoint: endpoint.clone(),
            frames: FramedRead::new(stream, self.frame_codec),
            assembler: MultipartAssembler::new(),
        });
        Ok(())
    }

    /// Add a topic filter, matched as a byte prefix of each message header.
    ///
    /// `""` receives every message.
    pub fn subscribe(&mut self, filter: impl Into<Bytes>) {
        let filter = filter.into();
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
    }

    /// Remove a previously added topic filter.
    pub fn unsubscribe(&mut self, filter: &[u8]) {
        self.filters.retain(|f| f.as_ref() != filter);
    }

    /// Receive the next matching array.
    ///
    /// Waits until a whole header/payload pair arrives, or until the configured
    /// receive timeout elapses. The receipt time is stamped right after
    /// decoding, in the reference offset.
    pub async fn recv(&mut self) -> Result<ReceivedArray> {
        let result = match self.recv_timeout {
            Some(duration) => tokio::time::timeout(duration, self.recv_matching())
                .await
                .unwrap_or(Err(StreamError::Timeout { duration })),
            None => self.recv_matching().await,
        };

        if let Err(StreamError::ConnectionClosed { .. }) = &result {
            if let SubscriberState::Connected(connection) = &self.state {
                debug!(endpoint = %connection.endpoint, "Dropping dead connection");
                self.state = SubscriberState::Closed;
            }
        }
        result
    }

    async fn recv_matching(&mut self) -> Result<ReceivedArray> {
        let connection = match &mut self.state {
            SubscriberState::Connected(connection) => connection,
            SubscriberState::Disconnected => {
                return Err(StreamError::NotConnected { operation: "recv" });
            }
            SubscriberState::Closed => {
                return Err(StreamError::connection_closed("subscriber was closed"));
            }
        };

        loop {
            let parts = connection.next_message().await?;

            let matched = parts
                .first()
                .is_some_and(|header| self.filters.iter().any(|f| header.starts_with(f)));
            if !matched {
                trace!("Message does not match any topic filter, skipped");
                continue;
            }

            let [header, payload] = <[Bytes; 2]>::try_from(parts).map_err(|parts| {
                StreamError::malformed(format!(
                    "expected a 2-part message, got {} parts",
                    parts.len()
                ))
            })?;

            let message = self.codec.decode(&header, payload)?;
            let received_at = self.codec.clock().now();
            return Ok(ReceivedArray::new(message, received_at));
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SubscriberState::Connected(_))
    }

    pub fn codec(&self) -> &ArrayCodec {
        &self.codec
    }

    /// Release the connection. Idempotent.
    pub fn close(&mut self) {
        if let SubscriberState::Connected(connection) =
            std::mem::replace(&mut self.state, SubscriberState::Closed)
        {
            info!(endpoint = %connection.endpoint, "Subscriber closed");
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for Subscriber {
    async fn recv_frame(&mut self) -> Result<Option<ReceivedArray>> {
        self.recv().await.map(Some)
    }

    fn describe(&self) -> String {
        match &self.state {
            SubscriberState::Connected(connection) => format!("subscriber({})", connection.endpoint),
            SubscriberState::Disconnected => "subscriber(disconnected)".to_string(),
            SubscriberState::Closed => "subscriber(closed)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_before_connect_is_not_connected() {
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        subscriber.subscribe("");

        let err = subscriber.recv().await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected { operation: "recv" }));
    }

    #[tokio::test]
    async fn recv_after_close_is_connection_closed() {
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        subscriber.close();
        subscriber.close();

        let err = subscriber.recv().await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionClosed { .. }));
        assert!(!subscriber.is_connected());
    }

    #[tokio::test]
    async fn connecting_to_wildcard_is_rejected() {
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        let err = subscriber.connect(&Endpoint::wildcard(1936)).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidEndpoint { .. }));
    }

    #[test]
    fn filters_are_deduplicated_and_removable() {
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        subscriber.subscribe("");
        subscriber.subscribe("");
        subscriber.subscribe(&b"{\"dtype\""[..]);
        assert_eq!(subscriber.filters.len(), 2);

        subscriber.unsubscribe(b"");
        assert_eq!(subscriber.filters.len(), 1);
    }

    /// Serve `bytes` raw to the first connection, then hang up.
    async fn one_shot_server(bytes: Vec<u8>) -> Endpoint {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&bytes).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        Endpoint::new("127.0.0.1", port)
    }

    fn encoded(frames: Vec<crate::transport::WireFrame>) -> Vec<u8> {
        use tokio_util::codec::Encoder;

        let mut codec = FrameCodec::default();
        let mut buf = bytes::BytesMut::new();
        for frame in frames {
            codec.encode(frame, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[tokio::test]
    async fn hang_up_mid_frame_is_connection_closed() {
        let endpoint = one_shot_server(vec![1, 0, 0, 0, 100, b'{', b'"', b'd']).await;
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        subscriber.connect(&endpoint).await.unwrap();
        subscriber.subscribe("");

        let err = subscriber.recv().await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionClosed { .. }), "{err}");
        assert!(!subscriber.is_connected());
    }

    #[tokio::test]
    async fn overlong_message_is_malformed_and_the_next_one_arrives() {
        use crate::transport::WireFrame;

        let header = Bytes::from_static(br#"{"dtype":"uint8","shape":[2],"time_send":1.0,"time_start_pose_process":0.5}"#);
        let bytes = encoded(vec![
            WireFrame::more(header.clone()),
            WireFrame::more(Bytes::from_static(&[1, 2])),
            WireFrame::more(Bytes::from_static(&[3, 4])),
            WireFrame::last(Bytes::from_static(&[5, 6])),
            WireFrame::more(header),
            WireFrame::last(Bytes::from_static(&[7, 8])),
        ]);
        let endpoint = one_shot_server(bytes).await;
        let mut subscriber = Subscriber::new(&StreamConfig::default()).unwrap();
        subscriber.connect(&endpoint).await.unwrap();
        subscriber.subscribe("");

        let err = subscriber.recv().await.unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }), "{err}");
        assert!(subscriber.is_connected());

        let frame = subscriber.recv().await.unwrap();
        assert_eq!(frame.array().to_vec::<u8>().unwrap(), vec![7, 8]);
    }
}
