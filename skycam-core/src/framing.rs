//! Stream framing for image frames.
//!
//! The transport is a plain byte stream with no message boundaries, so
//! each frame is wrapped in a redundant envelope: a length header that
//! lets a receiver pre-size its read, plus literal start/end markers
//! that let it verify framing integrity independent of the length
//! field after partial or corrupted reads.
//!
//! ## Wire format
//!
//! ```text
//! offset 0          : "SIZE"                       (4)
//! offset 4          : total message length, i32 LE (4)   = 6 + 33 + payload + 4
//! offset 8          : "FBEGIN"                     (6)
//! offset 14         : ImageMetadata, packed        (33)
//! offset 47         : payload                      (payload_size)
//! offset 47+payload : "FEND"                       (4)
//! ```
//!
//! Decoding scans for the markers rather than trusting the length
//! header: everything before `FBEGIN` (including the length header) is
//! skippable preamble, and the span between the markers must match the
//! metadata's own `payload_size`. A mismatch discards through the end
//! marker and resumes scanning after it.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::SkycamError;
use crate::frame::{Frame, ImageMetadata, MAX_PAYLOAD_SIZE};

// ── Constants ────────────────────────────────────────────────────

/// Literal tag preceding the length header.
pub const SIZE_TAG: &[u8; 4] = b"SIZE";

/// Literal start-of-frame marker.
pub const FRAME_BEGIN: &[u8; 6] = b"FBEGIN";

/// Literal end-of-frame marker.
pub const FRAME_END: &[u8; 4] = b"FEND";

/// Envelope bytes around a payload: length header, markers, metadata.
pub const WIRE_OVERHEAD: usize =
    SIZE_TAG.len() + 4 + FRAME_BEGIN.len() + ImageMetadata::SIZE + FRAME_END.len();

/// Encoded size of the largest legal frame, including the envelope.
pub const MAX_WIRE_SIZE: usize = WIRE_OVERHEAD + MAX_PAYLOAD_SIZE;

// ── Encoding ─────────────────────────────────────────────────────

/// Encode a frame into its wire envelope.
///
/// The length header counts everything after itself: start marker,
/// metadata, payload, end marker.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, SkycamError> {
    if frame.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(SkycamError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let total =
        (FRAME_BEGIN.len() + ImageMetadata::SIZE + frame.payload.len() + FRAME_END.len()) as i32;

    let mut out = Vec::with_capacity(SIZE_TAG.len() + 4 + total as usize);
    out.extend_from_slice(SIZE_TAG);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(FRAME_BEGIN);
    out.extend_from_slice(&frame.meta.encode());
    out.extend_from_slice(&frame.payload);
    out.extend_from_slice(FRAME_END);
    Ok(out)
}

// ── Scanning ─────────────────────────────────────────────────────

/// Result of scanning a receive buffer for one frame.
#[derive(Debug, PartialEq)]
pub enum ScanOutcome {
    /// No start marker, or a start marker with no end marker yet.
    /// The caller keeps every byte and accumulates more.
    Incomplete,
    /// Markers found but the span disagrees with the declared payload
    /// size. `resume` is the offset strictly past the end marker;
    /// the caller discards up to it and scans again.
    Malformed { resume: usize },
    /// A complete frame. `consumed` covers the frame and any preamble
    /// before its start marker.
    Frame { frame: Frame, consumed: usize },
}

/// First occurrence of `needle` in `haystack`.
fn find_marker(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scan `buf` for the next complete frame.
///
/// Pure over the input: the caller applies `consumed`/`resume` to its
/// own buffer. Every access is bounds-checked against `buf.len()`.
pub fn scan_frame(buf: &[u8]) -> ScanOutcome {
    let Some(start) = find_marker(buf, FRAME_BEGIN) else {
        return ScanOutcome::Incomplete;
    };
    let body = start + FRAME_BEGIN.len();

    let Some(end_rel) = find_marker(&buf[body..], FRAME_END) else {
        return ScanOutcome::Incomplete;
    };
    let end = body + end_rel;
    let resume = end + FRAME_END.len();
    let span = end - body;

    if span < ImageMetadata::SIZE {
        return ScanOutcome::Malformed { resume };
    }

    let meta = match ImageMetadata::decode(&buf[body..body + ImageMetadata::SIZE]) {
        Ok(m) => m,
        Err(_) => return ScanOutcome::Malformed { resume },
    };

    if !meta.payload_size_valid() || span != ImageMetadata::SIZE + meta.payload_size as usize {
        return ScanOutcome::Malformed { resume };
    }

    // The size field is the load-bearing value; the span check above
    // guarantees it fits inside the marker gap.
    let payload_start = body + ImageMetadata::SIZE;
    let payload = buf[payload_start..payload_start + meta.payload_size as usize].to_vec();

    ScanOutcome::Frame {
        frame: Frame { meta, payload },
        consumed: resume,
    }
}

// ── FrameCodec ───────────────────────────────────────────────────

/// `tokio_util` codec for the frame stream.
///
/// Decoding skips malformed spans instead of erroring: framing damage
/// costs at most one frame, never the connection. A receive buffer
/// that fills past `max_buffer` without yielding a frame is reset —
/// a hard cap, since any legal frame fits within [`MAX_WIRE_SIZE`].
#[derive(Debug)]
pub struct FrameCodec {
    max_buffer: usize,
    /// Malformed spans skipped since construction.
    malformed: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_buffer: MAX_WIRE_SIZE,
            malformed: 0,
        }
    }

    /// Override the receive-buffer cap (mainly for tests).
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Number of malformed spans skipped so far.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = SkycamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SkycamError> {
        loop {
            match scan_frame(&src[..]) {
                ScanOutcome::Frame { frame, consumed } => {
                    let _ = src.split_to(consumed);
                    return Ok(Some(frame));
                }
                ScanOutcome::Malformed { resume } => {
                    self.malformed += 1;
                    warn!(skipped = resume, "malformed frame span; resuming scan");
                    let _ = src.split_to(resume);
                }
                ScanOutcome::Incomplete => {
                    if src.len() > self.max_buffer {
                        warn!(
                            buffered = src.len(),
                            cap = self.max_buffer,
                            "receive buffer full without a frame; resetting"
                        );
                        src.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = SkycamError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), SkycamError> {
        let bytes = encode_frame(&frame)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let meta = ImageMetadata {
            width: 4,
            height: 4,
            temperature: -5.0,
            exposure: 0.25,
            timestamp_us: 42,
            exposing: false,
            exposures_requested: 0,
            exposure_index: 0,
            quality: 70,
            binning: 1,
            payload_size: 0,
        };
        Frame::new(meta, vec![0x5A; 32])
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = sample_frame();
        let wire = encode_frame(&frame).unwrap();

        match scan_frame(&wire) {
            ScanOutcome::Frame { frame: out, consumed } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(out.meta, frame.meta);
                assert_eq!(out.payload, frame.payload);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn length_header_counts_envelope() {
        let frame = sample_frame();
        let wire = encode_frame(&frame).unwrap();

        assert_eq!(&wire[0..4], SIZE_TAG);
        let declared = i32::from_le_bytes(wire[4..8].try_into().unwrap());
        let expected = (FRAME_BEGIN.len() + ImageMetadata::SIZE + 32 + FRAME_END.len()) as i32;
        assert_eq!(declared, expected);
        assert_eq!(&wire[8..14], FRAME_BEGIN);
        assert_eq!(&wire[wire.len() - 4..], FRAME_END);
    }

    #[test]
    fn known_vector_2x2() {
        // 2×2 image, 8-byte payload of 0xAA.
        let meta = ImageMetadata {
            width: 2,
            height: 2,
            temperature: -10.0,
            exposure: 0.5,
            timestamp_us: 1000,
            exposing: false,
            exposures_requested: 0,
            exposure_index: 0,
            quality: 70,
            binning: 1,
            payload_size: 8,
        };
        let frame = Frame::new(meta, vec![0xAA; 8]);
        let wire = encode_frame(&frame).unwrap();

        match scan_frame(&wire) {
            ScanOutcome::Frame { frame: out, consumed } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(out.meta.width, 2);
                assert_eq!(out.meta.height, 2);
                assert_eq!(out.meta.temperature, -10.0);
                assert_eq!(out.meta.exposure, 0.5);
                assert_eq!(out.meta.timestamp_us, 1000);
                assert_eq!(out.meta.payload_size, 8);
                assert_eq!(out.payload, vec![0xAA; 8]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn incomplete_without_start_marker() {
        assert_eq!(scan_frame(b"garbage bytes"), ScanOutcome::Incomplete);
        assert_eq!(scan_frame(&[]), ScanOutcome::Incomplete);
    }

    #[test]
    fn incomplete_with_start_but_no_end() {
        let frame = sample_frame();
        let wire = encode_frame(&frame).unwrap();

        // Everything except the closing marker.
        let partial = &wire[..wire.len() - FRAME_END.len()];
        assert_eq!(scan_frame(partial), ScanOutcome::Incomplete);
    }

    #[test]
    fn preamble_is_consumed_with_the_frame() {
        let frame = sample_frame();
        let mut wire = b"noise-before".to_vec();
        wire.extend_from_slice(&encode_frame(&frame).unwrap());

        match scan_frame(&wire) {
            ScanOutcome::Frame { consumed, .. } => assert_eq!(consumed, wire.len()),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn malformed_span_resumes_past_end_marker() {
        let frame = sample_frame();
        let mut wire = encode_frame(&frame).unwrap();

        // Corrupt the declared payload size (offset 8 + 6 + 29 in the
        // envelope) so the span no longer matches.
        let size_off = 8 + FRAME_BEGIN.len() + 29;
        wire[size_off..size_off + 4].copy_from_slice(&99i32.to_le_bytes());

        match scan_frame(&wire) {
            ScanOutcome::Malformed { resume } => {
                // Strictly past the corrupted end marker.
                assert_eq!(resume, wire.len());
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn malformed_negative_payload_size() {
        let frame = sample_frame();
        let mut wire = encode_frame(&frame).unwrap();
        let size_off = 8 + FRAME_BEGIN.len() + 29;
        wire[size_off..size_off + 4].copy_from_slice(&(-5i32).to_le_bytes());

        assert!(matches!(
            scan_frame(&wire),
            ScanOutcome::Malformed { .. }
        ));
    }

    #[test]
    fn end_marker_inside_metadata_is_malformed() {
        // A stray FEND right after FBEGIN: span too short for metadata.
        let mut wire = Vec::new();
        wire.extend_from_slice(FRAME_BEGIN);
        wire.extend_from_slice(b"xx");
        wire.extend_from_slice(FRAME_END);

        match scan_frame(&wire) {
            ScanOutcome::Malformed { resume } => assert_eq!(resume, wire.len()),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn codec_decodes_across_partial_feeds() {
        let frame = sample_frame();
        let wire = encode_frame(&frame).unwrap();

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        // Feed in three pieces; only the last completes the frame.
        let cut1 = 10;
        let cut2 = wire.len() - 3;

        buf.extend_from_slice(&wire[..cut1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[cut1..cut2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[cut2..]);
        let out = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(out.payload, frame.payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_skips_malformed_then_yields_next_frame() {
        let good = sample_frame();
        let mut wire = encode_frame(&good).unwrap();
        // Corrupt the first copy's size field, then append a good copy.
        let size_off = 8 + FRAME_BEGIN.len() + 29;
        wire[size_off..size_off + 4].copy_from_slice(&1i32.to_le_bytes());
        wire.extend_from_slice(&encode_frame(&good).unwrap());

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&wire[..]);

        let out = codec.decode(&mut buf).unwrap().expect("second frame");
        assert_eq!(out.payload, good.payload);
        assert_eq!(codec.malformed_count(), 1);
    }

    #[test]
    fn codec_resets_overfull_buffer() {
        let mut codec = FrameCodec::new().with_max_buffer(64);
        let mut buf = BytesMut::from(&[0u8; 200][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let frame = sample_frame();
        let mut wire = encode_frame(&frame).unwrap();
        wire.extend_from_slice(&encode_frame(&frame).unwrap());

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&wire[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let mut meta = ImageMetadata::default();
        meta.payload_size = (MAX_PAYLOAD_SIZE + 1) as i32;
        let frame = Frame {
            meta,
            payload: vec![0; MAX_PAYLOAD_SIZE + 1],
        };
        assert!(matches!(
            encode_frame(&frame),
            Err(SkycamError::PayloadTooLarge { .. })
        ));
    }
}
