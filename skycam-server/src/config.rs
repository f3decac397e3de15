//! Configuration for the skycam server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use skycam_core::SimulatedCamera;
use skycam_core::acquire::AcquireConfig;
use skycam_core::net::StreamServerConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Camera and capture settings.
    pub camera: CameraConfig,
    /// Auto-exposure tuning.
    pub exposure: ExposureConfig,
    /// Sequence archive settings.
    pub archive: ArchiveConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the stream server binds.
    pub bind_addr: String,
    /// TCP port for the frame stream and control channel.
    pub port: u16,
    /// Minimum time between outgoing frames, in milliseconds.
    pub send_interval_ms: u64,
}

/// Camera and capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Initial binning factor (1..=4).
    pub binning: u8,
    /// Initial compression quality (0..=100).
    pub quality: u8,
    /// Exposure before the controller has seen any data, in seconds.
    pub initial_exposure_s: f64,
    /// Idle time between capture cycles, in milliseconds.
    pub poll_interval_ms: u64,
    /// Simulated sensor gain in counts per second of exposure.
    pub gain: f64,
    /// Simulated sensor temperature in degrees Celsius.
    pub temperature_c: f32,
}

/// Auto-exposure tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Target value for the 90th-percentile pixel.
    pub target: f64,
    /// Dead-band half-width around the target.
    pub tolerance: f64,
    /// Longest exposure the controller may choose, in seconds.
    pub max_exposure_s: f64,
}

/// Sequence archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory commanded sequences are written into.
    pub dir: String,
    /// Disable to stream without writing anything to disk.
    pub enabled: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            camera: CameraConfig::default(),
            exposure: ExposureConfig::default(),
            archive: ArchiveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: skycam_core::DEFAULT_PORT,
            send_interval_ms: 33,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            binning: 1,
            quality: 70,
            initial_exposure_s: 0.1,
            poll_interval_ms: 10,
            gain: 400_000.0,
            temperature_c: -10.0,
        }
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            target: 40_000.0,
            tolerance: 5_000.0,
            max_exposure_s: 10.0,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: "./archive".into(),
            enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }

    /// Convert capture settings into an `AcquireConfig`.
    pub fn to_acquire_config(&self) -> AcquireConfig {
        AcquireConfig {
            poll_interval: Duration::from_millis(self.camera.poll_interval_ms.max(1)),
            quality: self.camera.quality.min(100),
            binning: self.camera.binning.clamp(1, 4),
            initial_exposure: self.camera.initial_exposure_s.clamp(0.001, 10.0),
            target_brightness: self.exposure.target,
            tolerance: self.exposure.tolerance,
            max_exposure: self.exposure.max_exposure_s.clamp(0.001, 10.0),
        }
    }

    /// Convert network settings into a `StreamServerConfig`.
    pub fn to_stream_config(&self) -> StreamServerConfig {
        StreamServerConfig {
            bind_addr: self.network.bind_addr.clone(),
            port: self.network.port,
            send_interval: Duration::from_millis(self.network.send_interval_ms.max(1)),
        }
    }

    /// Build the camera described by the `[camera]` section.
    pub fn build_camera(&self) -> SimulatedCamera {
        SimulatedCamera::new()
            .with_gain(self.camera.gain)
            .with_temperature(self.camera.temperature_c)
    }
}

// ── Tests ────────────────────────────────────────────────────────
