//! Domain-specific error types for the acquisition pipeline.
//!
//! All fallible operations return `Result<T, SkycamError>`.
//! Framing and command-range problems are recovered in place (skip or
//! clamp) and never surface here; what does surface is typed and tells
//! the caller whether to retry, reconnect, or give up.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the acquisition pipeline.
#[derive(Debug, Error)]
pub enum SkycamError {
    // ── Framing Errors ───────────────────────────────────────────
    /// A fixed-layout record was shorter than its wire size.
    #[error("record too short: {actual} bytes (need {expected})")]
    RecordTooShort { expected: usize, actual: usize },

    /// The payload exceeds the fixed maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A channel between loops was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Device Errors ────────────────────────────────────────────
    /// The capture device reported a failure.
    #[error("device error: {0}")]
    Device(String),

    /// A device operation was issued out of order (e.g. readout
    /// before exposure).
    #[error("device not ready: {0}")]
    DeviceNotReady(&'static str),

    // ── Codec Errors ─────────────────────────────────────────────
    /// Payload encoding failed.
    #[error("image encode failed: {0}")]
    Encode(String),

    /// Payload decoding failed.
    #[error("image decode failed: {0}")]
    Decode(String),

    // ── Archive Errors ───────────────────────────────────────────
    /// Writing an archived image or its sidecar failed.
    #[error("archive write failed: {0}")]
    Archive(String),

    // ── Task Errors ──────────────────────────────────────────────
    /// A spawned loop failed or panicked.
    #[error("task failed: {0}")]
    Task(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SkycamError {
    fn from(s: String) -> Self {
        SkycamError::Other(s)
    }
}

impl From<&str> for SkycamError {
    fn from(s: &str) -> Self {
        SkycamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SkycamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SkycamError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for SkycamError {
    fn from(e: tokio::task::JoinError) -> Self {
        SkycamError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for SkycamError {
    fn from(e: serde_json::Error) -> Self {
        SkycamError::Archive(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SkycamError::RecordTooShort {
            expected: 33,
            actual: 10,
        };
        assert!(e.to_string().contains("33"));
        assert!(e.to_string().contains("10"));

        let e = SkycamError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: SkycamError = "something broke".into();
        assert!(matches!(e, SkycamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let e: SkycamError = io_err.into();
        assert!(matches!(e, SkycamError::Connection(_)));
    }
}
