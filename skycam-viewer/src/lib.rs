//! # skycam-viewer — stream viewer and sequence commander
//!
//! Console client for the skycam server. Connects over TCP, drains
//! the frame stream, reports receive statistics, optionally decodes
//! captures to disk, and sends control commands (quality, binning,
//! exposure sequences) back up the same connection.

pub mod config;
pub mod session;
