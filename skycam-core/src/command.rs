//! Control commands sent from the viewer to the server.
//!
//! A command is a fixed 23-byte record, packed little-endian:
//!
//! ```text
//! offset 0  : quality      u8        compression quality, 0..=100
//! offset 1  : start        u8        begin an exposure sequence
//! offset 2  : stop         u8        abort the running sequence
//! offset 3  : count        u8        exposures in the sequence, 1..=127
//! offset 4  : binning      u8        sensor binning, 1..=4
//! offset 5  : exposure     f64       exposure time in seconds
//! offset 13 : prefix       [u8; 10]  archive name prefix, NUL-padded
//! ```
//!
//! Decoding never rejects a structurally complete record: out-of-range
//! fields are clamped into their legal ranges so a misbehaving sender
//! degrades to a usable command instead of a dead control channel.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SkycamError;

// ── Limits ───────────────────────────────────────────────────────

/// Shortest exposure a command may request, in seconds.
pub const MIN_EXPOSURE: f64 = 0.001;

/// Longest exposure a command may request, in seconds.
pub const MAX_EXPOSURE: f64 = 10.0;

/// Highest sensor binning factor.
pub const MAX_BINNING: u8 = 4;

/// Most exposures a single sequence may request.
pub const MAX_COUNT: u8 = 127;

/// Top of the compression quality scale.
pub const MAX_QUALITY: u8 = 100;

// ── ControlCommand ───────────────────────────────────────────────

/// One viewer-to-server control record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCommand {
    /// Compression quality, `0..=100`.
    pub quality: u8,
    /// Start an exposure sequence.
    pub start: bool,
    /// Stop the running sequence.
    pub stop: bool,
    /// Number of exposures requested, `1..=127`.
    pub count: u8,
    /// Sensor binning, `1..=4`.
    pub binning: u8,
    /// Exposure time in seconds, `0.001..=10.0`.
    pub exposure: f64,
    /// Archive name prefix, NUL-padded.
    pub prefix: [u8; 10],
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self {
            quality: 70,
            start: false,
            stop: false,
            count: 1,
            binning: 1,
            exposure: 0.1,
            prefix: [0; 10],
        }
    }
}

impl ControlCommand {
    /// Encoded size in bytes.
    pub const SIZE: usize = 23;

    /// A start command for a sequence of `count` exposures.
    pub fn start(count: u8, exposure: f64, binning: u8, prefix: &str) -> Self {
        let mut cmd = Self {
            start: true,
            ..Self::default()
        };
        cmd = cmd
            .with_count(count)
            .with_exposure(exposure)
            .with_binning(binning);
        let bytes = prefix.as_bytes();
        let n = bytes.len().min(cmd.prefix.len());
        cmd.prefix[..n].copy_from_slice(&bytes[..n]);
        cmd
    }

    /// A stop command.
    pub fn stop() -> Self {
        Self {
            stop: true,
            ..Self::default()
        }
    }

    /// Set the quality, clamped to `0..=100`.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(MAX_QUALITY);
        self
    }

    /// Set the exposure, clamped to `0.001..=10.0` seconds.
    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.exposure = clamp_exposure(exposure);
        self
    }

    /// Set the binning, clamped to `1..=4`.
    pub fn with_binning(mut self, binning: u8) -> Self {
        self.binning = binning.clamp(1, MAX_BINNING);
        self
    }

    /// Set the sequence length, clamped to `1..=127`.
    pub fn with_count(mut self, count: u8) -> Self {
        self.count = count.clamp(1, MAX_COUNT);
        self
    }

    /// The prefix up to its first NUL, lossily decoded.
    pub fn prefix_str(&self) -> String {
        let end = self
            .prefix
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.prefix.len());
        String::from_utf8_lossy(&self.prefix[..end]).into_owned()
    }

    /// Encode into the packed 23-byte record.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.quality;
        buf[1] = self.start as u8;
        buf[2] = self.stop as u8;
        buf[3] = self.count;
        buf[4] = self.binning;
        buf[5..13].copy_from_slice(&self.exposure.to_le_bytes());
        buf[13..23].copy_from_slice(&self.prefix);
        buf
    }

    /// Decode a packed record, clamping every field into range.
    pub fn decode(data: &[u8]) -> Result<Self, SkycamError> {
        if data.len() < Self::SIZE {
            return Err(SkycamError::RecordTooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }

        let mut prefix = [0u8; 10];
        prefix.copy_from_slice(&data[13..23]);

        Ok(Self {
            quality: data[0].min(MAX_QUALITY),
            start: data[1] != 0,
            stop: data[2] != 0,
            count: data[3].clamp(1, MAX_COUNT),
            binning: data[4].clamp(1, MAX_BINNING),
            exposure: clamp_exposure(f64::from_le_bytes(data[5..13].try_into().unwrap())),
            prefix,
        })
    }
}

/// Clamp an exposure into the legal range; non-finite values collapse
/// to the minimum.
fn clamp_exposure(exposure: f64) -> f64 {
    if !exposure.is_finite() {
        return MIN_EXPOSURE;
    }
    exposure.clamp(MIN_EXPOSURE, MAX_EXPOSURE)
}

// ── CommandCodec ─────────────────────────────────────────────────

/// `tokio_util` codec for the fixed-size command stream.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl CommandCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for CommandCodec {
    type Item = ControlCommand;
    type Error = SkycamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ControlCommand>, SkycamError> {
        if src.len() < ControlCommand::SIZE {
            return Ok(None);
        }
        let record = src.split_to(ControlCommand::SIZE);
        let cmd = ControlCommand::decode(&record)?;
        Ok(Some(cmd))
    }
}

impl Encoder<ControlCommand> for CommandCodec {
    type Error = SkycamError;

    fn encode(&mut self, cmd: ControlCommand, dst: &mut BytesMut) -> Result<(), SkycamError> {
        dst.extend_from_slice(&cmd.encode());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cmd = ControlCommand::start(5, 1.5, 2, "m31");
        let out = ControlCommand::decode(&cmd.encode()).unwrap();
        assert_eq!(out, cmd);
        assert_eq!(out.prefix_str(), "m31");
    }

    #[test]
    fn field_offsets() {
        let mut prefix = [0u8; 10];
        prefix[..4].copy_from_slice(b"ngc7");
        let cmd = ControlCommand {
            quality: 80,
            start: true,
            stop: false,
            count: 9,
            binning: 2,
            exposure: 2.5,
            prefix,
        };
        let buf = cmd.encode();

        assert_eq!(buf[0], 80);
        assert_eq!(buf[1], 1);
        assert_eq!(buf[2], 0);
        assert_eq!(buf[3], 9);
        assert_eq!(buf[4], 2);
        assert_eq!(f64::from_le_bytes(buf[5..13].try_into().unwrap()), 2.5);
        assert_eq!(&buf[13..17], b"ngc7");
        assert_eq!(buf.len(), ControlCommand::SIZE);
    }

    #[test]
    fn decode_clamps_exposure_high() {
        let mut buf = ControlCommand::default().encode();
        buf[5..13].copy_from_slice(&50.0f64.to_le_bytes());
        let cmd = ControlCommand::decode(&buf).unwrap();
        assert_eq!(cmd.exposure, MAX_EXPOSURE);
    }

    #[test]
    fn decode_clamps_exposure_low_and_nan() {
        let mut buf = ControlCommand::default().encode();
        buf[5..13].copy_from_slice(&0.0f64.to_le_bytes());
        assert_eq!(
            ControlCommand::decode(&buf).unwrap().exposure,
            MIN_EXPOSURE
        );

        buf[5..13].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(
            ControlCommand::decode(&buf).unwrap().exposure,
            MIN_EXPOSURE
        );
    }

    #[test]
    fn decode_clamps_binning_zero_to_one() {
        let mut buf = ControlCommand::default().encode();
        buf[4] = 0;
        assert_eq!(ControlCommand::decode(&buf).unwrap().binning, 1);

        buf[4] = 9;
        assert_eq!(ControlCommand::decode(&buf).unwrap().binning, MAX_BINNING);
    }

    #[test]
    fn decode_clamps_quality() {
        let mut buf = ControlCommand::default().encode();
        buf[0] = 150;
        assert_eq!(ControlCommand::decode(&buf).unwrap().quality, MAX_QUALITY);
    }

    #[test]
    fn decode_clamps_count() {
        let mut buf = ControlCommand::default().encode();
        buf[3] = 0;
        assert_eq!(ControlCommand::decode(&buf).unwrap().count, 1);

        buf[3] = 200;
        assert_eq!(ControlCommand::decode(&buf).unwrap().count, MAX_COUNT);
    }

    #[test]
    fn decode_too_short() {
        let buf = [0u8; ControlCommand::SIZE - 1];
        assert!(matches!(
            ControlCommand::decode(&buf),
            Err(SkycamError::RecordTooShort { .. })
        ));
    }

    #[test]
    fn prefix_truncates_long_names() {
        let cmd = ControlCommand::start(1, 0.1, 1, "a-very-long-target-name");
        assert_eq!(cmd.prefix_str(), "a-very-lon");
    }

    #[test]
    fn codec_waits_for_full_record() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::new();

        let cmd = ControlCommand::stop();
        let wire = cmd.encode();

        buf.extend_from_slice(&wire[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[10..]);
        let out = codec.decode(&mut buf).unwrap().expect("complete record");
        assert!(out.stop);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_encodes_exact_size() {
        let mut codec = CommandCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(ControlCommand::default(), &mut buf).unwrap();
        assert_eq!(buf.len(), ControlCommand::SIZE);
    }
}
