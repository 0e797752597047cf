//! Shared types for the frame pipeline.
//!
//! These are the in-memory frame representations used between pipeline
//! stages. The *wire* representation is just the raw encoded payload
//! carried by [`crate::codec::FrameCodec`].

use bytes::Bytes;

use crate::error::CastError;

// ── PixelRect ────────────────────────────────────────────────────

/// An axis-aligned pixel rectangle.
///
/// `x`/`y` are signed so that padding arithmetic can go negative
/// before validation; a rectangle published in a [`crate::detect::Detection`]
/// is always non-negative and inside its source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle lies entirely inside a `frame_width` ×
    /// `frame_height` frame.
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x as i64 + self.width as i64 <= frame_width as i64
            && self.y as i64 + self.height as i64 <= frame_height as i64
    }
}

// ── DecodedImage ─────────────────────────────────────────────────

/// A decoded in-memory bitmap, tightly-packed RGBA8 rows.
///
/// Produced by the receiving side from an encoded payload; immutable
/// after creation. Subscribers share it behind an `Arc` and never
/// mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel data — `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl DecodedImage {
    /// Bytes consumed by a single RGBA8 pixel.
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Build from tightly-packed RGBA8 data.
    ///
    /// Returns `DecodeMalformed` if the buffer length does not match
    /// the dimensions.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CastError> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(CastError::DecodeMalformed(format!(
                "rgba buffer is {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode an encoded image payload (JPEG, PNG, …) into a bitmap.
    pub fn from_encoded(payload: &[u8]) -> Result<Self, CastError> {
        let img = image::load_from_memory(payload)
            .map_err(|e| CastError::DecodeMalformed(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            data: rgba.into_raw(),
        })
    }

    /// Total byte size of the bitmap.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    /// The RGBA bytes of row `y`.
    ///
    /// # Panics
    ///
    /// Panics if `y` is out of bounds.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data[start..start + self.stride()]
    }

    /// The RGBA bytes of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = y as usize * self.stride() + x as usize * Self::BYTES_PER_PIXEL;
        &self.data[offset..offset + Self::BYTES_PER_PIXEL]
    }
}

// ── HubFrame ─────────────────────────────────────────────────────

/// One broadcast frame: the raw wire payload plus its decoded bitmap.
///
/// The hub owns the frame until every subscriber has been notified;
/// after that the last `Arc` clone to drop releases it.
#[derive(Debug, Clone)]
pub struct HubFrame {
    /// The encoded payload exactly as received off the wire.
    pub payload: Bytes,
    /// The decoded bitmap.
    pub image: DecodedImage,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_fits_within() {
        let r = PixelRect::new(10, 10, 20, 20);
        assert!(r.fits_within(30, 30));
        assert!(!r.fits_within(29, 30));
        assert!(!r.fits_within(30, 29));

        let neg = PixelRect::new(-1, 0, 5, 5);
        assert!(!neg.fits_within(100, 100));
    }

    #[test]
    fn rect_fits_exactly() {
        let r = PixelRect::new(0, 0, 64, 48);
        assert!(r.fits_within(64, 48));
    }

    #[test]
    fn from_rgba8_validates_length() {
        assert!(DecodedImage::from_rgba8(2, 2, vec![0u8; 16]).is_ok());
        assert!(matches!(
            DecodedImage::from_rgba8(2, 2, vec![0u8; 15]),
            Err(CastError::DecodeMalformed(_))
        ));
    }

    #[test]
    fn pixel_and_row_access() {
        let mut data = vec![0u8; 4 * 4 * 4];
        // Paint pixel (1, 2) red.
        let off = 2 * 16 + 1 * 4;
        data[off] = 255;
        data[off + 3] = 255;
        let img = DecodedImage::from_rgba8(4, 4, data).unwrap();

        assert_eq!(img.pixel(1, 2), &[255, 0, 0, 255]);
        assert_eq!(img.row(2).len(), 16);
        assert_eq!(img.stride(), 16);
    }

    #[test]
    fn from_encoded_rejects_garbage() {
        let err = DecodedImage::from_encoded(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(err, Err(CastError::DecodeMalformed(_))));
    }

    #[test]
    fn from_encoded_png_roundtrip() {
        // Encode a tiny RGBA image with the image crate, decode through
        // the payload path.
        let src = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut payload = Vec::new();
        src.write_to(
            &mut std::io::Cursor::new(&mut payload),
            image::ImageFormat::Png,
        )
        .unwrap();

        let img = DecodedImage::from_encoded(&payload).unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(img.pixel(0, 0), &[10, 20, 30, 255]);
    }
}
