//! Capture configuration.
//!
//! Loaded from a TOML file shaped like:
//!
//! ```toml
//! [scanner]
//! channel_scan_cmd = "sudo iw wlan1 scan"
//! channel_busy_cmd = "sudo iw wlan1 survey dump"
//! spectrum_2ghz_cmd = "sudo ./wipry-lp -2"
//! spectrum_5ghz_cmd = "sudo ./wipry-lp -5"
//! spectrum_6ghz_cmd = "sudo ./wipry-lp -6"
//!
//! [capture]
//! rounds = 5
//! round_delay_ms = 1000
//! max_samples = 10
//! sample_timeout_secs = 20
//! ```
//!
//! Every key is optional. Commands are shell strings run through `sh -c`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::channels::Band;
use crate::parse::spectrum::DEFAULT_SAMPLE_MARKER;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── File shape ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub scanner: ScannerInput,
    pub capture: CaptureInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScannerInput {
    pub channel_scan_cmd: Option<String>,
    pub channel_busy_cmd: Option<String>,
    pub spectrum_2ghz_cmd: Option<String>,
    pub spectrum_5ghz_cmd: Option<String>,
    pub spectrum_6ghz_cmd: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureInput {
    pub rounds: Option<u32>,
    pub round_delay_ms: Option<u64>,
    pub max_samples: Option<usize>,
    pub sample_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    pub max_output_bytes: Option<usize>,
    pub sample_marker: Option<String>,
}

// ── Resolved config ─────────────────────────────────────────────────

/// Shell command per capture kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerCommands {
    pub channel_scan: String,
    pub channel_survey: String,
    pub spectrum_24: String,
    pub spectrum_5: String,
    pub spectrum_6: String,
}

impl Default for ScannerCommands {
    fn default() -> Self {
        Self {
            channel_scan: "sudo iw wlan1 scan".into(),
            channel_survey: "sudo iw wlan1 survey dump".into(),
            spectrum_24: "sudo ./wipry-lp -2".into(),
            spectrum_5: "sudo ./wipry-lp -5".into(),
            spectrum_6: "sudo ./wipry-lp -6".into(),
        }
    }
}

impl ScannerCommands {
    pub fn spectrum(&self, band: Band) -> &str {
        match band {
            Band::Ghz24 => &self.spectrum_24,
            Band::Ghz5 => &self.spectrum_5,
            Band::Ghz6 => &self.spectrum_6,
        }
    }
}

/// Smallest accepted `capture.max_output_bytes`.
pub const MIN_OUTPUT_BYTES: usize = 1024;

/// Everything the capture orchestrator needs, injected at construction.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub commands: ScannerCommands,
    /// Scan/survey rounds per capture.
    pub rounds: u32,
    /// Pause between rounds.
    pub round_delay: Duration,
    /// Sample lines after which a spectrum run is stopped.
    pub max_samples: usize,
    /// Wall-clock budget of one spectrum run.
    pub sample_timeout: Duration,
    /// Upper bound for the fixed scan/survey commands.
    pub command_timeout: Duration,
    /// Output cap of one spectrum run.
    pub max_output_bytes: usize,
    pub sample_marker: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            commands: ScannerCommands::default(),
            rounds: 5,
            round_delay: Duration::from_secs(1),
            max_samples: 10,
            sample_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(30),
            max_output_bytes: 8 * 1024 * 1024,
            sample_marker: DEFAULT_SAMPLE_MARKER.to_string(),
        }
    }
}

fn command(value: Option<String>, default: String, key: &str) -> Result<String, ConfigError> {
    match value {
        None => Ok(default),
        Some(cmd) if cmd.trim().is_empty() => {
            Err(ConfigError::Invalid(format!("scanner.{key} is empty")))
        }
        Some(cmd) => Ok(cmd.trim().to_string()),
    }
}

impl ConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<CaptureConfig, ConfigError> {
        let defaults = CaptureConfig::default();
        let d = defaults.commands;
        let s = self.scanner;
        let commands = ScannerCommands {
            channel_scan: command(s.channel_scan_cmd, d.channel_scan, "channel_scan_cmd")?,
            channel_survey: command(s.channel_busy_cmd, d.channel_survey, "channel_busy_cmd")?,
            spectrum_24: command(s.spectrum_2ghz_cmd, d.spectrum_24, "spectrum_2ghz_cmd")?,
            spectrum_5: command(s.spectrum_5ghz_cmd, d.spectrum_5, "spectrum_5ghz_cmd")?,
            spectrum_6: command(s.spectrum_6ghz_cmd, d.spectrum_6, "spectrum_6ghz_cmd")?,
        };

        let c = self.capture;
        let rounds = c.rounds.unwrap_or(defaults.rounds);
        if rounds == 0 {
            return Err(ConfigError::Invalid("capture.rounds must be at least 1".into()));
        }
        let max_samples = c.max_samples.unwrap_or(defaults.max_samples);
        if max_samples == 0 {
            return Err(ConfigError::Invalid(
                "capture.max_samples must be at least 1".into(),
            ));
        }
        let sample_timeout = c
            .sample_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.sample_timeout);
        let command_timeout = c
            .command_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);
        if sample_timeout.is_zero() || command_timeout.is_zero() {
            return Err(ConfigError::Invalid("capture timeouts must be non-zero".into()));
        }
        let max_output_bytes = c.max_output_bytes.unwrap_or(defaults.max_output_bytes);
        if max_output_bytes < MIN_OUTPUT_BYTES {
            return Err(ConfigError::Invalid(format!(
                "capture.max_output_bytes must be at least {MIN_OUTPUT_BYTES}"
            )));
        }
        let sample_marker = c.sample_marker.unwrap_or(defaults.sample_marker);
        if sample_marker.is_empty() {
            return Err(ConfigError::Invalid("capture.sample_marker is empty".into()));
        }

        Ok(CaptureConfig {
            commands,
            rounds,
            round_delay: c
                .round_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.round_delay),
            max_samples,
            sample_timeout,
            command_timeout,
            max_output_bytes,
            sample_marker,
        })
    }
}

/// Load the capture config from `path`.
///
/// A missing file is not an error: defaults are used and a warning logged.
pub fn load(path: &Path) -> Result<CaptureConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let config = ConfigFile::from_toml_str(&text)?.resolve()?;
            tracing::info!(path = %path.display(), "loaded capture config");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found, using default commands");
            Ok(CaptureConfig::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}
