//! Image metadata and frame types.
//!
//! [`ImageMetadata`] travels on the wire as a packed 33-byte record
//! directly after the frame start marker (see [`crate::framing`]).
//!
//! ## Wire format
//!
//! **Metadata record** (33 bytes, little-endian, no padding):
//! ```text
//! width:               u32  (4)
//! height:              u32  (4)
//! temperature:         f32  (4)
//! exposure:            f32  (4)
//! timestamp_us:        u64  (8)
//! exposing:            u8   (1)
//! exposures_requested: u8   (1)
//! exposure_index:      u8   (1)
//! quality:             u8   (1)
//! binning:             u8   (1)
//! payload_size:        i32  (4)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::SkycamError;

// ── Constants ────────────────────────────────────────────────────

/// Largest encoded payload a frame may carry (4 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

// ── ImageMetadata ────────────────────────────────────────────────

/// Per-frame metadata sent alongside the encoded pixel payload.
///
/// `payload_size` is the load-bearing field on the wire: the decoder
/// validates the span between the frame markers against it and copies
/// exactly that many payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Image width in pixels (after binning).
    pub width: u32,
    /// Image height in pixels (after binning).
    pub height: u32,
    /// Sensor temperature in °C at capture time.
    pub temperature: f32,
    /// Exposure duration in seconds used for this capture.
    pub exposure: f32,
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Whether a commanded exposure sequence was running.
    pub exposing: bool,
    /// Number of exposures requested by the active sequence (0 when idle).
    pub exposures_requested: u8,
    /// 1-based index of this frame within the sequence (0 when idle).
    pub exposure_index: u8,
    /// Codec quality the payload was encoded with (0..=100).
    pub quality: u8,
    /// Binning factor applied at capture.
    pub binning: u8,
    /// Payload length in bytes.
    pub payload_size: i32,
}

impl ImageMetadata {
    /// Encoded size on the wire.
    pub const SIZE: usize = 33;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.width.to_le_bytes());
        buf[4..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..12].copy_from_slice(&self.temperature.to_le_bytes());
        buf[12..16].copy_from_slice(&self.exposure.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[24] = self.exposing as u8;
        buf[25] = self.exposures_requested;
        buf[26] = self.exposure_index;
        buf[27] = self.quality;
        buf[28] = self.binning;
        buf[29..33].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, SkycamError> {
        if data.len() < Self::SIZE {
            return Err(SkycamError::RecordTooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            width: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            height: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            temperature: f32::from_le_bytes(data[8..12].try_into().unwrap()),
            exposure: f32::from_le_bytes(data[12..16].try_into().unwrap()),
            timestamp_us: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            exposing: data[24] != 0,
            exposures_requested: data[25],
            exposure_index: data[26],
            quality: data[27],
            binning: data[28],
            payload_size: i32::from_le_bytes(data[29..33].try_into().unwrap()),
        })
    }

    /// Whether the declared payload size is usable (non-negative and
    /// within the fixed maximum).
    pub fn payload_size_valid(&self) -> bool {
        self.payload_size >= 0 && (self.payload_size as usize) <= MAX_PAYLOAD_SIZE
    }
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            temperature: 0.0,
            exposure: 0.0,
            timestamp_us: 0,
            exposing: false,
            exposures_requested: 0,
            exposure_index: 0,
            quality: 0,
            binning: 1,
            payload_size: 0,
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One complete image transmission unit: metadata + encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub meta: ImageMetadata,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, stamping `meta.payload_size` from the payload.
    pub fn new(mut meta: ImageMetadata, payload: Vec<u8>) -> Self {
        meta.payload_size = payload.len() as i32;
        Self { meta, payload }
    }
}

/// Current wall-clock time as microseconds since the Unix epoch.
///
/// A clock set before the epoch yields 0 rather than an error; the
/// timestamp is informational.
pub fn timestamp_now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> ImageMetadata {
        ImageMetadata {
            width: 1392,
            height: 1040,
            temperature: -10.5,
            exposure: 0.25,
            timestamp_us: 1_700_000_000_000_000,
            exposing: true,
            exposures_requested: 5,
            exposure_index: 2,
            quality: 70,
            binning: 2,
            payload_size: 8192,
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let meta = sample_meta();
        let encoded = meta.encode();
        let decoded = ImageMetadata::decode(&encoded).unwrap();

        assert_eq!(decoded, meta);
    }

    #[test]
    fn metadata_too_short() {
        let short = [0u8; 20];
        let err = ImageMetadata::decode(&short).unwrap_err();
        assert!(matches!(
            err,
            SkycamError::RecordTooShort {
                expected: ImageMetadata::SIZE,
                actual: 20
            }
        ));
    }

    #[test]
    fn metadata_field_offsets() {
        // Pin the packed layout: a change here breaks wire compatibility.
        let meta = sample_meta();
        let buf = meta.encode();

        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 1392);
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 1040);
        assert_eq!(buf[24], 1); // exposing
        assert_eq!(buf[25], 5); // exposures_requested
        assert_eq!(buf[26], 2); // exposure_index
        assert_eq!(buf[27], 70); // quality
        assert_eq!(buf[28], 2); // binning
        assert_eq!(i32::from_le_bytes(buf[29..33].try_into().unwrap()), 8192);
    }

    #[test]
    fn frame_new_stamps_payload_size() {
        let frame = Frame::new(ImageMetadata::default(), vec![0xAA; 64]);
        assert_eq!(frame.meta.payload_size, 64);
    }

    #[test]
    fn payload_size_validation() {
        let mut meta = sample_meta();
        assert!(meta.payload_size_valid());

        meta.payload_size = -1;
        assert!(!meta.payload_size_valid());

        meta.payload_size = (MAX_PAYLOAD_SIZE + 1) as i32;
        assert!(!meta.payload_size_valid());
    }
}
