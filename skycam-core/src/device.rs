//! Camera device abstraction.
//!
//! Acquisition talks to a [`CaptureDevice`] trait object, so the same
//! loop drives real hardware and the deterministic simulator used by
//! tests and bench setups. The capture sequence is the hardware's:
//! arm an exposure, read the sensor into the device buffer, then take
//! the image out of the buffer.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::SkycamError;

// ── Capabilities ─────────────────────────────────────────────────

/// Static properties reported by a camera.
#[derive(Debug, Clone, Copy)]
pub struct CameraCapabilities {
    /// Full sensor width in pixels, unbinned.
    pub sensor_width: u32,
    /// Full sensor height in pixels, unbinned.
    pub sensor_height: u32,
    /// Highest supported binning factor.
    pub max_binning: u8,
    /// Shortest exposure the shutter can time, in seconds.
    pub min_exposure: f64,
    /// Longest supported exposure, in seconds.
    pub max_exposure: f64,
}

impl CameraCapabilities {
    /// Image dimensions at a binning factor.
    pub fn binned_extent(&self, binning: u8) -> (u32, u32) {
        let b = u32::from(binning.clamp(1, self.max_binning));
        (self.sensor_width / b, self.sensor_height / b)
    }
}

/// One readout from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    /// Row-major 16-bit samples, `width * height` of them.
    pub pixels: Vec<u16>,
    pub width: u32,
    pub height: u32,
}

// ── CaptureDevice ────────────────────────────────────────────────

/// A camera the acquisition loop can drive.
#[async_trait]
pub trait CaptureDevice: Send {
    fn capabilities(&self) -> CameraCapabilities;

    /// Bring the device up. Must precede any capture call.
    async fn open(&mut self) -> Result<(), SkycamError>;

    /// Shut the device down and drop any buffered image.
    async fn close(&mut self) -> Result<(), SkycamError>;

    /// Arm and time one exposure. Resolves when the shutter closes.
    async fn start_exposure(&mut self, exposure: f64, binning: u8) -> Result<(), SkycamError>;

    /// Transfer the exposed sensor into the device buffer.
    async fn read_ccd(&mut self) -> Result<(), SkycamError>;

    /// Take the buffered image. Each readout yields one image.
    fn get_image(&mut self) -> Result<RawImage, SkycamError>;

    /// Current sensor temperature in degrees Celsius.
    async fn temperature(&mut self) -> Result<f32, SkycamError>;

    /// Expose, read out, and return one image.
    async fn snap(&mut self, exposure: f64, binning: u8) -> Result<RawImage, SkycamError> {
        self.start_exposure(exposure, binning).await?;
        self.read_ccd().await?;
        self.get_image()
    }
}

// ── SimulatedCamera ──────────────────────────────────────────────

/// Deterministic in-memory camera.
///
/// Brightness is `exposure * gain` plus a small positional ripple, so
/// exposure control and compression see realistic, repeatable data.
/// With the default gain, a 0.1 s exposure lands on the auto-exposure
/// target.
#[derive(Debug)]
pub struct SimulatedCamera {
    caps: CameraCapabilities,
    gain: f64,
    sensor_temp: f32,
    /// Multiplier on the exposure wait; zero makes captures instant.
    time_scale: f64,
    open: bool,
    pending: Option<(f64, u8)>,
    readout: Option<RawImage>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            caps: CameraCapabilities {
                sensor_width: 1392,
                sensor_height: 1040,
                max_binning: 4,
                min_exposure: 0.001,
                max_exposure: 10.0,
            },
            gain: 400_000.0,
            sensor_temp: -10.0,
            time_scale: 1.0,
            open: false,
            pending: None,
            readout: None,
        }
    }

    /// Override the counts-per-second gain.
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Override the reported sensor temperature.
    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.sensor_temp = celsius;
        self
    }

    /// Scale the simulated exposure wait; zero disables it.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    fn synthesize(&self, exposure: f64, binning: u8) -> RawImage {
        let (width, height) = self.caps.binned_extent(binning);
        let base = (exposure * self.gain).clamp(0.0, f64::from(u16::MAX)) as u32;
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = base + ((x + y) & 0x3F);
                pixels.push(v.min(u32::from(u16::MAX)) as u16);
            }
        }
        RawImage {
            pixels,
            width,
            height,
        }
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SimulatedCamera {
    fn capabilities(&self) -> CameraCapabilities {
        self.caps
    }

    async fn open(&mut self) -> Result<(), SkycamError> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SkycamError> {
        self.open = false;
        self.pending = None;
        self.readout = None;
        Ok(())
    }

    async fn start_exposure(&mut self, exposure: f64, binning: u8) -> Result<(), SkycamError> {
        if !self.open {
            return Err(SkycamError::DeviceNotReady("camera not open"));
        }
        let binning = binning.clamp(1, self.caps.max_binning);
        let wait = exposure.max(0.0) * self.time_scale;
        if wait > 0.0 {
            sleep(Duration::from_secs_f64(wait)).await;
        }
        self.pending = Some((exposure, binning));
        Ok(())
    }

    async fn read_ccd(&mut self) -> Result<(), SkycamError> {
        let Some((exposure, binning)) = self.pending.take() else {
            return Err(SkycamError::DeviceNotReady("no exposure armed"));
        };
        self.readout = Some(self.synthesize(exposure, binning));
        Ok(())
    }

    fn get_image(&mut self) -> Result<RawImage, SkycamError> {
        self.readout
            .take()
            .ok_or(SkycamError::DeviceNotReady("no readout buffered"))
    }

    async fn temperature(&mut self) -> Result<f32, SkycamError> {
        if !self.open {
            return Err(SkycamError::DeviceNotReady("camera not open"));
        }
        Ok(self.sensor_temp)
    }
}

// ── Tests ────────────────────────────────────────────────────────
