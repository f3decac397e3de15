//! Calibration sweep over binning and exposure.
//!
//! Steps the camera through every binning factor and an exposure
//! ladder (1 ms, then ×5 per rung up to the device ceiling), captures
//! a handful of frames per setting, and folds their mean brightness
//! into per-setting statistics. A saturated rung ends the ladder for
//! that binning, since every longer exposure would clip too.
//!
//! Captures are optionally archived under `bin<b>_exp<ms>_<n>` names
//! so the sweep doubles as a flat-field data collector.

use skycam_core::archive::ArchiveSink;
use skycam_core::device::CaptureDevice;
use skycam_core::error::SkycamError;
use skycam_core::exposure::is_saturated;
use skycam_core::frame::{ImageMetadata, timestamp_now_us};
use skycam_core::stats::StatSeries;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Frames captured per (binning, exposure) setting.
pub const DEFAULT_FRAMES_PER_SETTING: usize = 10;

/// First rung of the exposure ladder, in seconds.
const LADDER_START: f64 = 0.001;

/// Multiplier between exposure rungs.
const LADDER_STEP: f64 = 5.0;

/// Summary of one (binning, exposure) setting.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationPoint {
    pub binning: u8,
    /// Exposure for this rung, seconds.
    pub exposure: f64,
    /// Mean of the per-frame mean brightness.
    pub mean_brightness: f64,
    /// Spread of the per-frame mean brightness.
    pub stdev: f64,
    /// Frames actually measured.
    pub frames: u64,
    /// Whether any frame at this setting clipped.
    pub saturated: bool,
}

/// Sweep the full binning and exposure grid.
///
/// Returns one [`CalibrationPoint`] per visited setting; cancellation
/// ends the sweep early with whatever was measured so far.
pub async fn run_sweep(
    device: &mut dyn CaptureDevice,
    archive: Option<&dyn ArchiveSink>,
    token: &CancellationToken,
    frames_per_setting: usize,
) -> Result<Vec<CalibrationPoint>, SkycamError> {
    device.open().await?;
    let caps = device.capabilities();
    info!(
        max_binning = caps.max_binning,
        max_exposure = caps.max_exposure,
        frames_per_setting,
        "calibration sweep started"
    );

    let mut points = Vec::new();
    let mut binning = 1u8;
    'sweep: while binning <= caps.max_binning {
        let mut exposure = LADDER_START.max(caps.min_exposure);
        while exposure <= caps.max_exposure {
            if token.is_cancelled() {
                info!("calibration sweep cancelled");
                break 'sweep;
            }

            let point =
                measure_setting(device, archive, token, binning, exposure, frames_per_setting)
                    .await?;
            info!(
                binning = point.binning,
                exposure = point.exposure,
                mean = point.mean_brightness,
                stdev = point.stdev,
                "calibration point"
            );

            let saturated = point.saturated;
            points.push(point);
            if saturated {
                info!(binning, exposure, "sensor saturated; ending exposure ladder");
                break;
            }
            exposure *= LADDER_STEP;
        }
        binning *= 2;
    }

    device.close().await?;
    info!(points = points.len(), "calibration sweep finished");
    Ok(points)
}

/// Capture and measure every frame for one setting.
async fn measure_setting(
    device: &mut dyn CaptureDevice,
    archive: Option<&dyn ArchiveSink>,
    token: &CancellationToken,
    binning: u8,
    exposure: f64,
    frames_per_setting: usize,
) -> Result<CalibrationPoint, SkycamError> {
    let mut series = StatSeries::new();
    let mut saturated = false;

    for index in 1..=frames_per_setting {
        if token.is_cancelled() {
            break;
        }

        let image = device.snap(exposure, binning).await?;
        let temperature = match device.temperature().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "temperature read failed");
                0.0
            }
        };

        series.push(mean_brightness(&image.pixels));
        if is_saturated(&image.pixels) {
            saturated = true;
        }

        if let Some(archive) = archive {
            let ms = (exposure * 1000.0).round() as u64;
            let name = format!("bin{binning}_exp{ms}_{index}");
            let meta = ImageMetadata {
                width: image.width,
                height: image.height,
                temperature,
                exposure: exposure as f32,
                timestamp_us: timestamp_now_us(),
                exposing: false,
                exposures_requested: 0,
                exposure_index: 0,
                quality: 100,
                binning,
                payload_size: (image.pixels.len() * 2) as i32,
            };
            if let Err(e) = archive.write(&image.pixels, image.width, image.height, &meta, &name) {
                warn!(error = %e, name, "calibration archive write failed");
            }
        }
    }

    Ok(CalibrationPoint {
        binning,
        exposure,
        mean_brightness: series.mean(),
        stdev: series.stdev(),
        frames: series.len(),
        saturated,
    })
}

fn mean_brightness(pixels: &[u16]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&v| f64::from(v)).sum::<f64>() / pixels.len() as f64
}

// ── Tests ────────────────────────────────────────────────────────
