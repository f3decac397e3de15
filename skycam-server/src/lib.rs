//! # skycam-server — CCD acquisition and streaming server
//!
//! Camera-side daemon that drives the CCD through the capture loop,
//! retunes exposure against scene brightness, archives commanded
//! exposure sequences, and streams compressed frames over TCP to a
//! single viewer.
//!
//! ## Modes
//!
//! - **Serve** (default): run the acquisition loop and stream server.
//! - **Calibrate**: sweep binning and exposure, record per-setting
//!   brightness statistics, and exit.

pub mod calibrate;
pub mod config;
