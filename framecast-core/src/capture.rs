//! Capture source capability.
//!
//! The sender treats the camera as opaque: something that yields
//! already-encoded image payloads and can be reconfigured (facing,
//! orientation). Platform backends (Camera2, V4L2, DirectShow) live
//! outside this crate behind [`CaptureSource`]; the built-in
//! [`TestPatternSource`] is a software stand-in used by the sender
//! binary and the tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CastError;

// ── Facing ───────────────────────────────────────────────────────

/// Which physical camera a capture source is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

impl Facing {
    /// The other camera.
    pub fn flipped(self) -> Self {
        match self {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        }
    }
}

// ── Orientation ──────────────────────────────────────────────────

/// Rotation to apply to an encoded frame so it displays upright.
///
/// Pure function of the sensor's mounting orientation, the current
/// device rotation and the lens facing (the front camera is mirrored).
/// All values in degrees; the result is normalized to `0..360`.
///
/// Recomputed on demand — it affects frames captured *after* the
/// recompute, never frames already in flight.
pub fn jpeg_orientation(sensor_orientation: i32, device_rotation: i32, facing: Facing) -> i32 {
    match facing {
        Facing::Front => (sensor_orientation + device_rotation).rem_euclid(360),
        Facing::Back => (sensor_orientation - device_rotation).rem_euclid(360),
    }
}

// ── CaptureSource ────────────────────────────────────────────────

/// An opaque producer of encoded image frames.
///
/// `next_frame` may block for as long as the device needs; the sender
/// calls it from its own pump task, never from a loop other components
/// depend on.
#[async_trait]
pub trait CaptureSource: Send {
    /// Produce the next encoded frame payload.
    async fn next_frame(&mut self) -> Result<Bytes, CastError>;

    /// The camera currently in use.
    fn facing(&self) -> Facing {
        Facing::Back
    }

    /// Reconfigure to the other camera. Takes effect on the next
    /// captured frame. Default: single-camera source, no-op.
    fn switch_facing(&mut self) {}
}

// ── TestPatternSource ────────────────────────────────────────────

/// Software capture source producing a paced, moving JPEG test pattern.
///
/// Each frame is a horizontal gradient that scrolls one step per
/// frame, so consecutive frames differ and downstream ordering is
/// observable.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    frame_counter: u64,
    facing: Facing,
}

impl TestPatternSource {
    /// A `width` × `height` pattern at `fps` frames per second.
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            frame_counter: 0,
            facing: Facing::Back,
        }
    }

    /// Frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.frame_counter
    }

    fn render_jpeg(&self) -> Result<Vec<u8>, CastError> {
        use image::ImageEncoder;

        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        let phase = (self.frame_counter % 256) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                let v = ((x + phase) % 256) as u8;
                // Front camera renders an inverted pattern so switching
                // is visible at the receiver.
                let v = match self.facing {
                    Facing::Back => v,
                    Facing::Front => 255 - v,
                };
                rgb.push(v);
                rgb.push((y % 256) as u8);
                rgb.push(128);
            }
        }

        let mut payload = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut payload, 80);
        encoder
            .write_image(
                &rgb,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| CastError::Other(format!("test pattern encode: {e}")))?;
        Ok(payload)
    }
}

#[async_trait]
impl CaptureSource for TestPatternSource {
    async fn next_frame(&mut self) -> Result<Bytes, CastError> {
        tokio::time::sleep(self.interval).await;
        let payload = self.render_jpeg()?;
        self.frame_counter += 1;
        Ok(Bytes::from(payload))
    }

    fn facing(&self) -> Facing {
        self.facing
    }

    fn switch_facing(&mut self) {
        self.facing = self.facing.flipped();
    }
}

// ── Tests ────────────────────────────────────────────────────────
