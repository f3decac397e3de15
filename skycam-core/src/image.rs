//! Image payload compression.
//!
//! Frame payloads carry a zstd-compressed record of the image:
//!
//! ```text
//! width:  u32 LE
//! height: u32 LE
//! pixels: u16 LE × (width * height)
//! ```
//!
//! The dimensions ride inside the payload as well as in the frame
//! metadata, so a decoded payload is self-describing and the decoder
//! can cross-check it byte-for-byte.

use crate::device::RawImage;
use crate::error::SkycamError;

/// Compresses raw sensor images into frame payloads and back.
pub trait ImageCodec: Send + Sync {
    /// Compress one image at a quality setting of `0..=100`.
    fn encode(
        &self,
        pixels: &[u16],
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Vec<u8>, SkycamError>;

    /// Decompress a payload back into an image.
    fn decode(&self, payload: &[u8]) -> Result<RawImage, SkycamError>;
}

// ── ZstdImageCodec ───────────────────────────────────────────────

/// Zstd-backed [`ImageCodec`].
///
/// Quality maps inversely onto the compression level: 100 favours
/// speed (level 1), 0 favours size (level 19). Compression is
/// lossless at every setting; quality only trades CPU for bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdImageCodec;

impl ZstdImageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Zstd level for a quality slider value.
    pub fn level_for(quality: u8) -> i32 {
        1 + (i32::from(100 - quality.min(100)) * 18) / 100
    }
}

impl ImageCodec for ZstdImageCodec {
    fn encode(
        &self,
        pixels: &[u16],
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Vec<u8>, SkycamError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(SkycamError::Encode(format!(
                "pixel count {} does not match {width}x{height}",
                pixels.len()
            )));
        }

        let mut raw = Vec::with_capacity(8 + pixels.len() * 2);
        raw.extend_from_slice(&width.to_le_bytes());
        raw.extend_from_slice(&height.to_le_bytes());
        for px in pixels {
            raw.extend_from_slice(&px.to_le_bytes());
        }

        zstd::encode_all(raw.as_slice(), Self::level_for(quality))
            .map_err(|e| SkycamError::Encode(format!("zstd encode failed: {e}")))
    }

    fn decode(&self, payload: &[u8]) -> Result<RawImage, SkycamError> {
        let raw = zstd::decode_all(payload)
            .map_err(|e| SkycamError::Decode(format!("zstd decode failed: {e}")))?;

        if raw.len() < 8 {
            return Err(SkycamError::Decode(format!(
                "payload too short for image header: {} bytes",
                raw.len()
            )));
        }
        let width = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(raw[4..8].try_into().unwrap());

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| {
                SkycamError::Decode(format!("image dimensions overflow: {width}x{height}"))
            })?;
        if raw.len() - 8 != expected {
            return Err(SkycamError::Decode(format!(
                "payload carries {} pixel bytes, header claims {expected}",
                raw.len() - 8
            )));
        }

        let pixels = raw[8..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(RawImage {
            pixels,
            width,
            height,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
