//! Serializable runtime settings for the sound player.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::DeviceInfo;
use crate::error::CueError;

const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;
const DEFAULT_BLOCK_SIZE: usize = 512;
const DEFAULT_OUTPUT_CHANNELS: usize = 2;
const DEFAULT_REAP_INTERVAL_MS: u64 = 100;

/// Player configuration, loadable from JSON.
///
/// Missing fields take their defaults, so `{}` is a valid settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rate assumed for newly prepared sources until a device starts.
    pub sample_rate: f64,
    /// Block size assumed until a device starts.
    pub block_size: usize,
    /// Channel count assumed until a device starts.
    pub output_channels: usize,
    /// How often finished playbacks are detached from the mixer.
    pub reap_interval_ms: u64,
    pub test_tone: TestToneSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            output_channels: DEFAULT_OUTPUT_CHANNELS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            test_tone: TestToneSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file and sanitize them.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CueError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CueError> {
        let settings: Settings = serde_json::from_str(raw)?;
        Ok(settings.sanitized())
    }

    /// Replace unusable values with defaults.
    pub fn sanitized(mut self) -> Self {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if self.block_size == 0 {
            self.block_size = DEFAULT_BLOCK_SIZE;
        }
        if self.output_channels == 0 {
            self.output_channels = DEFAULT_OUTPUT_CHANNELS;
        }
        self.reap_interval_ms = self.reap_interval_ms.max(1);
        self.test_tone = self.test_tone.sanitized();
        self
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }

    /// Device format implied by these settings.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            output_channels: self.output_channels,
        }
    }
}

/// Parameters of the diagnostic tone played by `play_test_sound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestToneSettings {
    pub frequency: f64,
    pub amplitude: f32,
    pub seconds: f64,
}

impl Default for TestToneSettings {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            amplitude: 0.5,
            seconds: 1.0,
        }
    }
}

impl TestToneSettings {
    fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            frequency: if self.frequency.is_finite() && self.frequency > 0.0 {
                self.frequency
            } else {
                defaults.frequency
            },
            amplitude: if self.amplitude.is_finite() {
                self.amplitude.clamp(0.0, 1.0)
            } else {
                defaults.amplitude
            },
            seconds: if self.seconds.is_finite() && self.seconds > 0.0 {
                self.seconds
            } else {
                defaults.seconds
            },
        }
    }
}
