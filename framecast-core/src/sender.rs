//! Sender-side connection lifecycle.
//!
//! [`FrameSender`] owns the producing device's single transport
//! connection: it connects with bounded retries, pumps captured frames
//! through [`FrameCodec`](crate::codec::FrameCodec) onto the socket,
//! and tears everything down on stop. Lifecycle feedback flows through
//! a [`StatusChannel`]; failures inside the pump never propagate — the
//! pump reports and self-stops.
//!
//! ```text
//!  Idle ──► Connecting ──► Streaming ──► Stopping ──► Stopped
//!              │ retry ▲                                  ▲
//!              └───────┘ (bounded, fixed backoff)         │
//!              └──────────── attempts exhausted ──────────┘
//! ```

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureSource;
use crate::codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec};
use crate::error::CastError;
use crate::status::StatusChannel;

// ── SenderState ──────────────────────────────────────────────────

/// The current phase of the sender's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Never started. Initial state.
    #[default]
    Idle,
    /// Connect attempts in progress.
    Connecting,
    /// Connected; the capture→encode→send pump is running.
    Streaming,
    /// Teardown in progress.
    Stopping,
    /// Terminal state after a stop or exhausted retries.
    Stopped,
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SenderState {
    /// Whether a start is currently in progress or streaming.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

// ── SenderConfig ─────────────────────────────────────────────────

/// Tuning knobs for [`FrameSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Fixed delay between connect attempts (not exponential).
    pub retry_backoff: Duration,
    /// Payload ceiling handed to the codec.
    pub max_frame_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ── FrameSender ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Target {
    host: String,
    port: u16,
    max_attempts: u32,
}

struct Shared {
    state: Mutex<SenderState>,
    status: StatusChannel,
    source: tokio::sync::Mutex<Box<dyn CaptureSource>>,
    cancel: Mutex<CancellationToken>,
    last_target: Mutex<Option<Target>>,
    config: SenderConfig,
}

impl Shared {
    /// Move to `Stopped` and emit the terminal status, once.
    fn finish_stop(&self) {
        let mut st = self.state.lock().expect("state lock");
        if *st != SenderState::Stopped {
            *st = SenderState::Stopped;
            drop(st);
            self.status.emit("stopped");
        }
    }
}

/// Sender-side connection lifecycle: bounded-retry connect, frame
/// pump, idempotent stop, source switching.
///
/// Exactly one connection is live per instance. `FrameSender` is
/// cheap to clone; clones share the same lifecycle.
#[derive(Clone)]
pub struct FrameSender {
    shared: Arc<Shared>,
}

impl FrameSender {
    /// Wrap a capture source with the default configuration.
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self::with_config(source, SenderConfig::default())
    }

    /// Wrap a capture source with explicit configuration.
    pub fn with_config(source: Box<dyn CaptureSource>, config: SenderConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SenderState::Idle),
                status: StatusChannel::new(),
                source: tokio::sync::Mutex::new(source),
                cancel: Mutex::new(CancellationToken::new()),
                last_target: Mutex::new(None),
                config,
            }),
        }
    }

    /// The sender's status event channel.
    pub fn status(&self) -> &StatusChannel {
        &self.shared.status
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SenderState {
        *self.shared.state.lock().expect("state lock")
    }

    /// Whether a start is in progress or frames are streaming.
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Connect to `host:port` and start streaming frames.
    ///
    /// Performs up to `max_attempts` connect attempts separated by the
    /// fixed backoff. Returns `Ok(true)` once streaming; `Ok(false)`
    /// when already running (reported as a status event, not an error)
    /// or when every attempt failed (state is then `Stopped`).
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        max_attempts: u32,
    ) -> Result<bool, CastError> {
        let cancel = {
            let mut st = self.shared.state.lock().expect("state lock");
            if st.is_active() {
                drop(st);
                self.shared.status.emit("already running");
                return Ok(false);
            }
            *st = SenderState::Connecting;
            drop(st);

            // Fresh token per start; a previous stop() left the old
            // one cancelled.
            let token = CancellationToken::new();
            *self.shared.cancel.lock().expect("cancel lock") = token.clone();
            token
        };

        *self.shared.last_target.lock().expect("target lock") = Some(Target {
            host: host.to_string(),
            port,
            max_attempts,
        });

        let max_attempts = max_attempts.max(1);
        let mut stream = None;
        for attempt in 1..=max_attempts {
            let connect = TcpStream::connect((host, port));
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.shared.finish_stop();
                    return Ok(false);
                }
                res = connect => res,
            };

            match result {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    self.shared.status.emit(format!(
                        "connect attempt {attempt}/{max_attempts} failed: {e}"
                    ));
                    if attempt < max_attempts {
                        tokio::time::sleep(self.shared.config.retry_backoff).await;
                    }
                }
            }
        }

        let Some(stream) = stream else {
            self.shared.finish_stop();
            return Ok(false);
        };

        *self.shared.state.lock().expect("state lock") = SenderState::Streaming;
        self.shared
            .status
            .emit(format!("connected to {host}:{port}"));

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            pump(shared, stream, cancel).await;
        });

        Ok(true)
    }

    /// Stop streaming and tear down the connection.
    ///
    /// Idempotent: a no-op from `Idle` or `Stopped`. Never blocks on
    /// in-flight work — the pump is cancelled and abandoned.
    pub async fn stop(&self) {
        {
            let mut st = self.shared.state.lock().expect("state lock");
            if matches!(*st, SenderState::Idle | SenderState::Stopped) {
                return;
            }
            *st = SenderState::Stopping;
        }
        self.shared.cancel.lock().expect("cancel lock").cancel();
        self.shared.finish_stop();
    }

    /// Switch the capture source to its other camera and restart the
    /// stream against the last-used target.
    ///
    /// Only meaningful while `Streaming`; otherwise a no-op returning
    /// `Ok(false)`.
    pub async fn switch_source(&self) -> Result<bool, CastError> {
        if self.state() != SenderState::Streaming {
            return Ok(false);
        }
        let Some(target) = self
            .shared
            .last_target
            .lock()
            .expect("target lock")
            .clone()
        else {
            return Ok(false);
        };

        self.stop().await;
        self.shared.source.lock().await.switch_facing();
        self.shared.status.emit("capture source switched");
        self.start(&target.host, target.port, target.max_attempts).await
    }
}

// ── Pump ─────────────────────────────────────────────────────────

/// Capture → encode → send loop.
///
/// Runs until cancelled or until capture/send fails. Every exit path
/// reports through the status channel and lands the sender in
/// `Stopped`; nothing escapes this task.
async fn pump(shared: Arc<Shared>, stream: TcpStream, cancel: CancellationToken) {
    let codec = FrameCodec::with_max_frame_len(shared.config.max_frame_len);
    let mut framed = FramedWrite::new(stream, codec);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            f = async { shared.source.lock().await.next_frame().await } => f,
        };

        match frame {
            Ok(payload) => {
                if let Err(e) = framed.send(payload).await {
                    shared.status.emit(format!("connection lost: {e}"));
                    break;
                }
            }
            Err(e) => {
                shared.status.emit(format!("capture error: {e}"));
                break;
            }
        }
    }

    shared.finish_stop();
}

// ── Tests ────────────────────────────────────────────────────────
