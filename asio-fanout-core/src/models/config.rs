use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::DriverError;

/// Device list entry that resolves to the current default output device.
pub const DEFAULT_DEVICE_ALIAS: &str = "(default)";

/// Upper bound on the logical channel count.
pub const MAX_CHANNELS: u16 = 32;

/// Verbosity applied to the `log` facade when the driver is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
            Self::Off => log::LevelFilter::Off,
        }
    }
}

/// Capture another output device's mix and inject it into the driver output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackPreference {
    /// Device id or friendly name of the device to capture.
    pub device_id: String,

    /// Make the captured device the OS default output while running, so that
    /// other applications' audio ends up in the loopback.
    #[serde(default)]
    pub intercept_default_output: bool,
}

/// Audible cue mixed into the output when triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneCuePreference {
    #[serde(default = "default_cue_gain")]
    pub gain: f64,
}

fn default_cue_gain() -> f64 {
    0.5
}

/// Immutable preference snapshot consumed by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverPreferences {
    /// Output targets in priority order. The first resolved device is the
    /// primary (exclusive mode, clock master).
    pub device_id_list: Vec<String>,

    pub sample_rate: u32,

    pub channel_count: u16,

    /// Fixed host buffer size in frames, or `None` to let the host choose.
    pub buffer_size_request: Option<u32>,

    pub log_level: LogLevel,

    pub loopback: Option<LoopbackPreference>,

    pub tone_cue: Option<ToneCuePreference>,
}

impl DriverPreferences {
    pub fn from_json_str(json: &str) -> Result<Self, DriverError> {
        let prefs: Self = serde_json::from_str(json)
            .map_err(|e| DriverError::ConfigurationFailed(format!("invalid preferences: {}", e)))?;
        prefs.validate().map_err(DriverError::ConfigurationFailed)?;
        Ok(prefs)
    }

    /// Load preferences from a JSON file.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let content = fs::read_to_string(path).map_err(|e| {
            DriverError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(format!("unsupported channel count: {}", self.channel_count));
        }
        if self.device_id_list.is_empty() {
            return Err("device list is empty".into());
        }
        if self.buffer_size_request == Some(0) {
            return Err("buffer size request must be positive".into());
        }
        if let Some(cue) = &self.tone_cue {
            if !(0.0..=1.0).contains(&cue.gain) {
                return Err(format!("tone cue gain out of range: {}", cue.gain));
            }
        }
        Ok(())
    }

    /// Whether a device list entry means "the current default output".
    pub fn is_default_alias(entry: &str) -> bool {
        entry.is_empty() || entry == DEFAULT_DEVICE_ALIAS
    }
}

impl Default for DriverPreferences {
    fn default() -> Self {
        Self {
            device_id_list: vec![DEFAULT_DEVICE_ALIAS.into()],
            sample_rate: 48000,
            channel_count: 2,
            buffer_size_request: None,
            log_level: LogLevel::Info,
            loopback: None,
            tone_cue: None,
        }
    }
}
