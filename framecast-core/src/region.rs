//! On-demand symbol decoding of one detected region.
//!
//! [`RegionDecoder`] resolves a user-chosen [`Detection`] into decoded
//! text: crop the frame to the detection bounds, convert to a Gray8
//! luminance buffer, hand it to the external [`SymbolDecoder`].
//!
//! By default the crop is taken from the **latest** frame the hub has
//! broadcast, not the frame the detection was computed from — the
//! bounds are historical, the pixels are current. See
//! [`RegionDecoderConfig::use_latest_frame`].

use std::sync::Arc;

use tokio::sync::watch;

use crate::detect::{Detection, DetectionBatch};
use crate::error::CastError;
use crate::hub::{SharedFrame, Subscription};
use crate::types::{DecodedImage, PixelRect};

// ── Symbol results ───────────────────────────────────────────────

/// Symbologies the decoder is asked to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFormat {
    Code128,
    QrCode,
    Ean13,
}

impl std::fmt::Display for SymbolFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code128 => write!(f, "CODE_128"),
            Self::QrCode => write!(f, "QR_CODE"),
            Self::Ean13 => write!(f, "EAN_13"),
        }
    }
}

/// Outcome of one decode attempt.
///
/// "No symbol in this region" is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Found {
        text: String,
        format: SymbolFormat,
    },
    NotFound,
}

// ── SymbolDecoder ────────────────────────────────────────────────

/// Decoding heuristics passed to the external decoder.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Symbologies to try.
    pub formats: Vec<SymbolFormat>,
    /// Spend more time on difficult images.
    pub try_harder: bool,
    /// Also try the inverted-polarity image.
    pub try_inverted: bool,
    /// Try rotated orientations.
    pub auto_rotate: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            formats: vec![
                SymbolFormat::Code128,
                SymbolFormat::QrCode,
                SymbolFormat::Ean13,
            ],
            try_harder: true,
            try_inverted: true,
            auto_rotate: true,
        }
    }
}

/// External barcode/QR symbol decoding capability.
///
/// Called synchronously on the caller's thread with a tightly-packed
/// Gray8 luminance buffer.
pub trait SymbolDecoder: Send + Sync {
    fn decode(
        &self,
        luminance: &[u8],
        width: u32,
        height: u32,
        options: &DecodeOptions,
    ) -> Result<DecodeOutcome, CastError>;
}

// ── Luminance conversion ─────────────────────────────────────────

/// Crop `bounds` out of an RGBA frame and convert to Gray8.
///
/// Uses the fixed-point ITU-R 601 weights
/// `(r·19562 + g·38550 + b·7424) >> 16` (≈ 0.2990/0.5870/0.1140) so
/// the result is deterministic across platforms.
///
/// Returns `None` when `bounds` does not lie entirely inside the
/// frame.
pub fn luminance_region(image: &DecodedImage, bounds: PixelRect) -> Option<Vec<u8>> {
    if !bounds.fits_within(image.width, image.height) {
        return None;
    }

    let mut out = Vec::with_capacity(bounds.width as usize * bounds.height as usize);
    for y in 0..bounds.height {
        for x in 0..bounds.width {
            let px = image.pixel((bounds.x as u32) + x, (bounds.y as u32) + y);
            let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
            out.push(((r * 19562 + g * 38550 + b * 7424) >> 16) as u8);
        }
    }
    Some(out)
}

// ── RegionDecoder ────────────────────────────────────────────────

/// Configuration for [`RegionDecoder`].
#[derive(Debug, Clone)]
pub struct RegionDecoderConfig {
    /// Decode against the latest broadcast frame (original behaviour)
    /// rather than the detection's own snapshot frame.
    ///
    /// Historical bounds over current pixels: if the scene moved
    /// between detection and selection, the crop may miss the symbol.
    /// Set to `false` to pin the decode to the batch's frame.
    pub use_latest_frame: bool,
    /// Heuristics for the external decoder.
    pub options: DecodeOptions,
}

impl Default for RegionDecoderConfig {
    fn default() -> Self {
        Self {
            use_latest_frame: true,
            options: DecodeOptions::default(),
        }
    }
}

/// Resolves one chosen detection into decoded text.
pub struct RegionDecoder {
    decoder: Arc<dyn SymbolDecoder>,
    config: RegionDecoderConfig,
    latest: watch::Receiver<Option<SharedFrame>>,
}

impl RegionDecoder {
    /// Spawn a task tracking the hub's latest frame and return the
    /// decoder handle.
    pub fn spawn(
        decoder: Arc<dyn SymbolDecoder>,
        mut frames: Subscription,
        config: RegionDecoderConfig,
    ) -> Self {
        let (latest_tx, latest) = watch::channel(None);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if latest_tx.send(Some(frame)).is_err() {
                    break;
                }
            }
        });

        Self {
            decoder,
            config,
            latest,
        }
    }

    /// Decoder without frame tracking; only
    /// [`decode_region`](Self::decode_region) is usable.
    pub fn detached(decoder: Arc<dyn SymbolDecoder>, config: RegionDecoderConfig) -> Self {
        let (_, latest) = watch::channel(None);
        Self {
            decoder,
            config,
            latest,
        }
    }

    /// Decode the region a detection points at.
    ///
    /// Frame selection follows
    /// [`RegionDecoderConfig::use_latest_frame`]; when no frame has
    /// arrived yet the batch's snapshot frame is used.
    pub fn decode_detection(
        &self,
        batch: &DetectionBatch,
        detection: &Detection,
    ) -> Result<DecodeOutcome, CastError> {
        let frame = if self.config.use_latest_frame {
            self.latest
                .borrow()
                .clone()
                .unwrap_or_else(|| Arc::clone(&batch.frame))
        } else {
            Arc::clone(&batch.frame)
        };
        self.decode_region(&frame.image, detection.bounds)
    }

    /// Decode an explicit region of an explicit frame.
    ///
    /// Bounds outside the frame yield `NotFound` — there is nothing to
    /// crop.
    pub fn decode_region(
        &self,
        image: &DecodedImage,
        bounds: PixelRect,
    ) -> Result<DecodeOutcome, CastError> {
        let Some(luminance) = luminance_region(image, bounds) else {
            return Ok(DecodeOutcome::NotFound);
        };
        self.decoder
            .decode(&luminance, bounds.width, bounds.height, &self.config.options)
    }
}

// ── Tests ────────────────────────────────────────────────────────
