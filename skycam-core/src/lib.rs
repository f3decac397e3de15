//! # skycam-core
//!
//! Core library for the skycam CCD acquisition and streaming system.
//!
//! This crate contains:
//! - **Frame types**: `ImageMetadata`, `Frame` — packed capture records
//! - **Framing**: marker-delimited wire envelope and `FrameCodec` for framed TCP I/O via `tokio_util`
//! - **Commands**: `ControlCommand` and `CommandCodec` for the viewer-to-server control channel
//! - **Slots**: `LatestSlot` — latest-wins handoff between acquisition and streaming
//! - **Exposure**: percentile-driven `ExposureEstimator` plus saturation/darkness predicates
//! - **Device**: `CaptureDevice` trait and the deterministic `SimulatedCamera`
//! - **Image**: `ImageCodec` / `ZstdImageCodec` payload compression
//! - **Acquire**: `AcquireService` — the camera-side capture loop
//! - **Net**: `StreamServer` and `ViewerClient` TCP endpoints
//! - **Archive**: `ArchiveSink` / `FlatFileArchive` for commanded sequences
//! - **Error**: `SkycamError` — typed, `thiserror`-based error hierarchy

pub mod acquire;
pub mod archive;
pub mod command;
pub mod device;
pub mod error;
pub mod exposure;
pub mod frame;
pub mod framing;
pub mod image;
pub mod net;
pub mod slot;
pub mod stats;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use acquire::{AcquireConfig, AcquireService};
pub use archive::{ArchiveSink, FlatFileArchive};
pub use command::{CommandCodec, ControlCommand};
pub use device::{CameraCapabilities, CaptureDevice, RawImage, SimulatedCamera};
pub use error::SkycamError;
pub use exposure::{ExposureEstimator, is_dark, is_saturated};
pub use frame::{Frame, ImageMetadata, MAX_PAYLOAD_SIZE, timestamp_now_us};
pub use framing::{FrameCodec, MAX_WIRE_SIZE, ScanOutcome, encode_frame, scan_frame};
pub use image::{ImageCodec, ZstdImageCodec};
pub use net::{
    DEFAULT_PORT, StreamServer, StreamServerConfig, ViewerClient, ViewerStats,
    connect_with_timeout,
};
pub use slot::{CommandSlot, ImageSlot, LatestSlot};
pub use stats::StatSeries;
