//! # framecast-core
//!
//! Core library for the framecast camera-streaming and code-scanning
//! pipeline.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec` — length-prefixed frame wire format via `tokio_util`
//! - **Sender**: `FrameSender` — bounded-retry connection lifecycle and frame pump
//! - **Hub**: `FrameHub` — accept/read loops multicasting decoded frames to subscribers
//! - **Detect**: `DetectionThrottle` — one-in-flight gate in front of an external detector
//! - **Region**: `RegionDecoder` — on-demand crop + luminance + symbol decode
//! - **Capture**: `CaptureSource` capability and the synthetic `TestPatternSource`
//! - **Status**: `StatusChannel` — per-component human-readable event stream
//! - **Error**: `CastError` — typed, `thiserror`-based error hierarchy

pub mod capture;
pub mod codec;
pub mod detect;
pub mod error;
pub mod hub;
pub mod region;
pub mod sender;
pub mod status;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{CaptureSource, Facing, TestPatternSource, jpeg_orientation};
pub use codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec, LENGTH_PREFIX_SIZE};
pub use detect::{
    CodeDetector, DETECTION_COOLDOWN, DETECTION_PADDING, Detection, DetectionBatch,
    DetectionThrottle, RawDetection, ThrottleConfig, pad_and_validate,
};
pub use error::CastError;
pub use hub::{
    FrameHub, HubConfig, ImagePayloadDecoder, PayloadDecoder, SharedFrame, Subscription,
};
pub use region::{
    DecodeOptions, DecodeOutcome, RegionDecoder, RegionDecoderConfig, SymbolDecoder,
    SymbolFormat, luminance_region,
};
pub use sender::{FrameSender, SenderConfig, SenderState};
pub use status::StatusChannel;
pub use types::{DecodedImage, HubFrame, PixelRect};
