//! Publisher: broadcasts encoded arrays to every connected subscriber
//!
//! `bind` spawns an accept task; every accepted subscriber gets its own writer
//! task fed from a bounded broadcast queue. `send` only encodes and enqueues,
//! so it never waits on the network and never fails because of a subscriber.

use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{ArrayCodec, EncodedMessage};
use crate::config::StreamConfig;
use crate::source::FrameSink;
use crate::transport::{Endpoint, FrameCodec, WireFrame};
use crate::types::{Metadata, NdArray};
use crate::{Result, StreamError};

/// Publishing endpoint for arrays.
///
/// # Example
///
/// ```rust,no_run
/// use posewire::{NdArray, Publisher, StreamConfig};
///
/// # #[tokio::main]
/// # async fn main() -> posewire::Result<()> {
/// let config = StreamConfig::default();
/// let mut publisher = Publisher::new(&config)?;
/// publisher.bind(&config.publisher_endpoint()).await?;
///
/// let pose = NdArray::from_elements(vec![17, 3], &[0.0f32; 51])?;
/// publisher.send_pose(&pose, posewire::clock::now_unix())?;
/// # Ok(())
/// # }
/// ```
pub struct Publisher {
    codec: ArrayCodec,
    frame_codec: FrameCodec,
    high_water_mark: usize,
    state: PublisherState,
}

enum PublisherState {
    Unbound,
    Bound(BoundPublisher),
    Closed,
}

struct BoundPublisher {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    messages: broadcast::Sender<Arc<EncodedMessage>>,
    subscribers: watch::Receiver<usize>,
    cancel: CancellationToken,
}

impl Publisher {
    /// Create an unbound publisher.
    pub fn new(config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codec: config.codec()?,
            frame_codec: FrameCodec::new(config.max_frame_bytes),
            high_water_mark: config.send_high_water_mark,
            state: PublisherState::Unbound,
        })
    }

    /// Open the listening endpoint and start accepting subscribers.
    ///
    /// Can be called once per publisher.
    pub async fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        match &self.state {
            PublisherState::Unbound => {}
            PublisherState::Bound(bound) => {
                return Err(StreamError::AlreadyBound { endpoint: bound.endpoint.to_string() });
            }
            PublisherState::Closed => {
                return Err(StreamError::AlreadyBound { endpoint: endpoint.to_string() });
            }
        }

        let listener = TcpListener::bind(endpoint.bind_address())
            .await
            .map_err(|e| StreamError::io(format!("binding {endpoint}"), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StreamError::io(format!("resolving bound address of {endpoint}"), e))?;

        let (messages, _) = broadcast::channel(self.high_water_mark);
        let (count_tx, subscribers) = watch::channel(0usize);
        let cancel = CancellationToken::new();

        tokio::spawn(accept_task(
            listener,
            messages.clone(),
            Arc::new(count_tx),
            self.frame_codec,
            cancel.clone(),
        ));

        info!(%endpoint, %local_addr, "Publisher bound");
        self.state = PublisherState::Bound(BoundPublisher {
            endpoint: endpoint.clone(),
            local_addr,
            messages,
            subscribers,
            cancel,
        });
        Ok(())
    }

    /// Encode and broadcast one array as a two-part message.
    ///
    /// Fire-and-forget: messages sent while no subscriber is connected are
    /// dropped, and late joiners never see earlier messages.
    pub fn send(&self, array: &NdArray, metadata: &Metadata) -> Result<()> {
        let bound = self.bound("send")?;
        let encoded = self.codec.encode(array, metadata)?;

        match bound.messages.send(Arc::new(encoded)) {
            Ok(receivers) => trace!(receivers, shape = ?array.shape(), "Message queued"),
            Err(_) => trace!("No subscribers, message dropped"),
        }
        Ok(())
    }

    /// Send a pose tensor stamped with the current time as `time_send`.
    pub fn send_pose(&self, array: &NdArray, time_start_pose_process: f64) -> Result<()> {
        self.send(array, &Metadata::pose_now(time_start_pose_process))
    }

    /// Send an image stamped with the current reference-offset time.
    pub fn send_image(&self, array: &NdArray) -> Result<()> {
        self.send(array, &Metadata::image_now(self.codec.clock()))
    }

    /// Address the listener is actually bound to (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.bound("query local address")?.local_addr)
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        match &self.state {
            PublisherState::Bound(bound) => *bound.subscribers.borrow(),
            _ => 0,
        }
    }

    /// Wait until at least `count` subscribers are connected.
    ///
    /// Messages sent before a subscriber connects are lost to it; producers that
    /// must not lose the first frames call this before sending.
    pub async fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> Result<()> {
        let mut subscribers = self.bound("wait for subscribers")?.subscribers.clone();
        match tokio::time::timeout(timeout, subscribers.wait_for(|&n| n >= count)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(StreamError::connection_closed("publisher accept task ended")),
            Err(_) => Err(StreamError::Timeout { duration: timeout }),
        }
    }

    pub fn codec(&self) -> &ArrayCodec {
        &self.codec
    }

    /// Stop accepting subscribers and disconnect the current ones.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if let PublisherState::Bound(bound) =
            std::mem::replace(&mut self.state, PublisherState::Closed)
        {
            info!(endpoint = %bound.endpoint, "Publisher closed");
            bound.cancel.cancel();
        }
    }

    fn bound(&self, operation: &'static str) -> Result<&BoundPublisher> {
        match &self.state {
            PublisherState::Bound(bound) => Ok(bound),
            PublisherState::Unbound => Err(StreamError::NotConnected { operation }),
            PublisherState::Closed => Err(StreamError::connection_closed("publisher was closed")),
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let PublisherState::Bound(bound) = &self.state {
            debug!(endpoint = %bound.endpoint, "Dropping publisher");
            bound.cancel.cancel();
        }
    }
}

#[async_trait::async_trait]
impl FrameSink for Publisher {
    async fn send_frame(&mut self, array: &NdArray, metadata: &Metadata) -> Result<()> {
        self.send(array, metadata)
    }
}

async fn accept_task(
    listener: TcpListener,
    messages: broadcast::Sender<Arc<EncodedMessage>>,
    subscribers: Arc<watch::Sender<usize>>,
    frame_codec: FrameCodec,
    cancel: CancellationToken,
) {
    debug!("Accept task started");

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept subscriber: {}", e);
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        // Subscribe before counting so a caller woken by the count never sends
        // into a queue this client does not yet read.
        let queue = messages.subscribe();
        subscribers.send_modify(|n| *n += 1);
        info!(%peer, "Subscriber connected ({} total)", *subscribers.borrow());

        tokio::spawn(client_task(
            stream,
            peer,
            queue,
            subscribers.clone(),
            frame_codec,
            cancel.child_token(),
        ));
    }

    debug!("Accept task ended");
}

async fn client_task(
    stream: TcpStream,
    peer: SocketAddr,
    mut queue: broadcast::Receiver<Arc<EncodedMessage>>,
    subscribers: Arc<watch::Sender<usize>>,
    frame_codec: FrameCodec,
    cancel: CancellationToken,
) {
    let (mut reader, writer) = stream.into_split();
    let mut sink = FramedWrite::new(writer, frame_codec);
    let mut discard = [0u8; 64];
    let mut sent = 0u64;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            // Subscribers never send data; a read only completes on hang-up.
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => {
                    debug!(%peer, "Subscriber hung up");
                    break;
                }
                Ok(_) => continue,
            },
            received = queue.recv() => match received {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer, skipped, "Subscriber is lagging, oldest messages dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let written = async {
            sink.feed(WireFrame::more(message.header.clone())).await?;
            sink.send(WireFrame::last(message.payload.clone())).await
        };
        if let Err(e) = written.await {
            debug!(%peer, "Dropping subscriber after write failure: {}", e);
            break;
        }
        sent += 1;
    }

    subscribers.send_modify(|n| *n = n.saturating_sub(1));
    info!(%peer, sent, "Subscriber disconnected ({} remaining)", *subscribers.borrow());
}
