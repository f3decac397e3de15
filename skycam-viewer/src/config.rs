//! Viewer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Output settings.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server address (IP:port).
    pub address: String,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
    /// Delay before a reconnect attempt, in milliseconds.
    pub reconnect_delay_ms: u64,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory received frames are decoded into; empty disables
    /// saving.
    pub save_dir: String,
    /// How often receive statistics are logged, in milliseconds.
    pub stats_interval_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Optional log file.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", skycam_core::DEFAULT_PORT),
            timeout_ms: 2000,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: String::new(),
            stats_interval_ms: 5000,
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

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
