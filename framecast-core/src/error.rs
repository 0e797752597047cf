//! Domain-specific error types for the framecast pipeline.
//!
//! All fallible operations return `Result<T, CastError>`.
//! Expected failure modes (connection loss, malformed frame, detector
//! trouble) are typed variants — never panics across a public boundary.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the framecast pipeline.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Transport Errors ─────────────────────────────────────────
    /// All connection attempts to the receiver were exhausted.
    #[error("connection failed after {attempts} attempts")]
    ConnectFailure { attempts: u32 },

    /// The byte stream closed in the middle of a framed payload.
    ///
    /// Terminal for that connection only; siblings are unaffected.
    #[error("stream closed mid-frame")]
    StreamClosed,

    /// A length prefix exceeded the configured codec ceiling.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The hub's listening address could not be parsed or bound.
    #[error("invalid listen address: {0}")]
    AddressInvalid(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A channel between pipeline stages was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Pipeline Errors ──────────────────────────────────────────
    /// A framed payload could not be decoded into a bitmap.
    ///
    /// Costs one frame; the producing connection stays up.
    #[error("malformed image payload: {0}")]
    DecodeMalformed(String),

    /// The external code detector failed for one run.
    ///
    /// The run is treated as producing zero detections.
    #[error("detector failure: {0}")]
    DetectorFailure(String),

    /// The external symbol decoder reported an internal error.
    ///
    /// Distinct from "no symbol found", which is not an error.
    #[error("symbol decoder failure: {0}")]
    SymbolDecoderFailure(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CastError {
    fn from(s: String) -> Self {
        CastError::Other(s)
    }
}

impl From<&str> for CastError {
    fn from(s: &str) -> Self {
        CastError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CastError::ChannelClosed
    }
}
