//! Receiver-side frame broadcast hub.
//!
//! [`FrameHub`] listens for producer connections, deframes each
//! connection's byte stream with [`FrameCodec`], decodes every payload
//! into a bitmap, and multicasts the result to all current
//! subscribers.
//!
//! Isolation rules:
//!
//! - one connection's read failure or close terminates only that
//!   connection's loop, never the accept loop or sibling connections;
//! - a malformed payload costs one frame, not the connection;
//! - a slow subscriber loses frames for itself only — publishing never
//!   blocks the read loops (hot stream, nothing is replayed).

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec};
use crate::error::CastError;
use crate::status::StatusChannel;
use crate::types::{DecodedImage, HubFrame};

/// A frame as shared with subscribers.
pub type SharedFrame = Arc<HubFrame>;

// ── PayloadDecoder ───────────────────────────────────────────────

/// Payload → bitmap seam between the wire and the broadcast.
///
/// The default [`ImagePayloadDecoder`] decodes encoded images (JPEG,
/// PNG). Tests substitute their own to observe raw payloads.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<DecodedImage, CastError>;
}

/// Decodes payloads as encoded images via the `image` crate.
pub struct ImagePayloadDecoder;

impl PayloadDecoder for ImagePayloadDecoder {
    fn decode(&self, payload: &[u8]) -> Result<DecodedImage, CastError> {
        DecodedImage::from_encoded(payload)
    }
}

// ── HubConfig ────────────────────────────────────────────────────

/// Tuning knobs for [`FrameHub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-subscriber frame buffer. When full, new frames are dropped
    /// for that subscriber.
    pub subscriber_buffer: usize,
    /// Payload ceiling handed to the codec.
    pub max_frame_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 8,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ── Subscriber registry ──────────────────────────────────────────

struct Registry {
    subs: Mutex<Vec<(u64, mpsc::Sender<SharedFrame>)>>,
    next_id: AtomicU64,
}

impl Registry {
    fn new() -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn subscribe(self: &Arc<Self>, buffer: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subs.lock().expect("subs lock").push((id, tx));
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subs
            .lock()
            .expect("subs lock")
            .retain(|(sub_id, _)| *sub_id != id);
    }

    /// Multicast one frame to every current subscriber.
    ///
    /// Iterates a snapshot so subscribe/unsubscribe stays safe while a
    /// broadcast is in progress. Never blocks: a full buffer means the
    /// frame is dropped for that subscriber.
    fn publish(&self, frame: SharedFrame) {
        let snapshot = self.subs.lock().expect("subs lock").clone();

        let mut closed = Vec::new();
        for (id, tx) in &snapshot {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow subscriber: hot stream, skip.
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if !closed.is_empty() {
            self.subs
                .lock()
                .expect("subs lock")
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subs.lock().expect("subs lock").len()
    }
}

/// A live subscription to the hub's frame stream.
///
/// Dropping it unsubscribes. Frames are forwarded references — the
/// subscriber never owns or mutates the underlying frame.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<SharedFrame>,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Receive the next frame. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SharedFrame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
impl Subscription {
    /// Build a subscription around a bare channel, bypassing a hub.
    pub(crate) fn from_receiver(rx: mpsc::Receiver<SharedFrame>) -> Self {
        Self {
            id: u64::MAX,
            rx,
            registry: Weak::new(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

// ── FrameHub ─────────────────────────────────────────────────────

/// TCP listener that turns producer byte streams into a shared
/// sequence of decoded frames.
///
/// Frames from one connection reach subscribers in receive order; no
/// ordering is guaranteed across distinct connections.
pub struct FrameHub {
    registry: Arc<Registry>,
    decoder: Arc<dyn PayloadDecoder>,
    status: StatusChannel,
    listener: Mutex<Option<(CancellationToken, SocketAddr)>>,
    config: HubConfig,
}

impl FrameHub {
    /// Hub with the default image decoder and configuration.
    pub fn new() -> Self {
        Self::with_decoder(Arc::new(ImagePayloadDecoder), HubConfig::default())
    }

    /// Hub with an explicit payload decoder and configuration.
    pub fn with_decoder(decoder: Arc<dyn PayloadDecoder>, config: HubConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            decoder,
            status: StatusChannel::new(),
            listener: Mutex::new(None),
            config,
        }
    }

    /// The hub's status event channel.
    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// Register a new subscriber. Frames already broadcast are never
    /// replayed.
    pub fn subscribe(&self) -> Subscription {
        self.registry.subscribe(self.config.subscriber_buffer)
    }

    /// Current number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    /// Bind `bind_host:port` and begin accepting producer connections.
    ///
    /// Fails fast with [`CastError::AddressInvalid`] when the address
    /// cannot be parsed or bound. Returns the bound address (useful
    /// with port 0). Starting an already-running hub is a no-op that
    /// returns the existing bound address.
    pub async fn start(&self, bind_host: &str, port: u16) -> Result<SocketAddr, CastError> {
        let ip: IpAddr = bind_host
            .parse()
            .map_err(|_| CastError::AddressInvalid(bind_host.to_string()))?;

        {
            let guard = self.listener.lock().expect("listener lock");
            if let Some((token, addr)) = guard.as_ref() {
                if !token.is_cancelled() {
                    self.status.emit("already running");
                    return Ok(*addr);
                }
            }
        }

        let listener = TcpListener::bind((ip, port))
            .await
            .map_err(|e| CastError::AddressInvalid(format!("{bind_host}:{port}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let token = CancellationToken::new();
        *self.listener.lock().expect("listener lock") = Some((token.clone(), local_addr));
        self.status.emit(format!("listening on {local_addr}"));

        let registry = Arc::clone(&self.registry);
        let decoder = Arc::clone(&self.decoder);
        let status = self.status.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            accept_loop(listener, registry, decoder, status, token, config).await;
        });

        Ok(local_addr)
    }

    /// Cancel the accept loop and every read loop; close the listener.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some((token, _)) = self.listener.lock().expect("listener lock").take() {
            token.cancel();
            self.status.emit("stopped");
        }
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameHub {
    fn drop(&mut self) {
        if let Some((token, _)) = self.listener.lock().expect("listener lock").take() {
            token.cancel();
        }
    }
}

// ── Loops ────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    decoder: Arc<dyn PayloadDecoder>,
    status: StatusChannel,
    cancel: CancellationToken,
    config: HubConfig,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, peer)) => {
                status.emit(format!("producer connected: {peer}"));
                let registry = Arc::clone(&registry);
                let decoder = Arc::clone(&decoder);
                let status = status.clone();
                let child = cancel.child_token();
                let max_frame_len = config.max_frame_len;
                tokio::spawn(async move {
                    read_loop(stream, peer, registry, decoder, status, child, max_frame_len)
                        .await;
                });
            }
            Err(e) => {
                // Transient accept failure; the listener stays up.
                tracing::warn!("accept error: {e}");
            }
        }
    }
}

async fn read_loop(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    decoder: Arc<dyn PayloadDecoder>,
    status: StatusChannel,
    cancel: CancellationToken,
    max_frame_len: usize,
) {
    let mut framed = FramedRead::new(stream, FrameCodec::with_max_frame_len(max_frame_len));

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = framed.next() => item,
        };

        match item {
            Some(Ok(payload)) => match decoder.decode(&payload) {
                Ok(image) => {
                    registry.publish(Arc::new(HubFrame { payload, image }));
                }
                Err(e) => {
                    tracing::warn!("skipping malformed frame from {peer}: {e}");
                    status.emit(format!("malformed frame from {peer} skipped"));
                }
            },
            Some(Err(e)) => {
                status.emit(format!("producer {peer} read error: {e}"));
                break;
            }
            None => {
                status.emit(format!("producer {peer} disconnected"));
                break;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
