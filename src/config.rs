// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management.
//!
//! Configuration is loaded once per session with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. config file (YAML)
//! 3. Environment variables (STIMGEN_*)
//! 4. CLI arguments
//!
//! Safety limits are only read from the file. They are never taken from the
//! environment so a stray variable cannot loosen them.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Physical safety limits
    #[serde(default)]
    pub safety: SafetyLimits,

    /// Sequence compiler settings
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Playback settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Output device description
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            for path in &["stimgen.yaml", "config.yaml", "/etc/stimgen/config.yaml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("STIMGEN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("STIMGEN_LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("STIMGEN_DEVICE") {
            self.device.name = val;
        }
        if let Ok(val) = env::var("STIMGEN_SAMPLE_RATE_HZ") {
            if let Ok(rate) = val.parse() {
                self.scheduler.sample_rate_hz = rate;
            }
        }
        if let Ok(val) = env::var("STIMGEN_READY_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.scheduler.ready_timeout_ms = ms;
            }
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.safety.validate()?;

        if self.compiler.max_events == 0 {
            return Err(Error::Config("compiler.max_events cannot be 0".into()));
        }

        let s = &self.scheduler;
        if s.sample_rate_hz == 0 {
            return Err(Error::Config("scheduler.sample_rate_hz cannot be 0".into()));
        }
        if s.segment_frames == 0 {
            return Err(Error::Config("scheduler.segment_frames cannot be 0".into()));
        }
        if s.lookahead_segments < 2 {
            return Err(Error::Config(
                "scheduler.lookahead_segments must be at least 2".into(),
            ));
        }
        if s.ready_timeout_ms == 0 {
            return Err(Error::Config("scheduler.ready_timeout_ms cannot be 0".into()));
        }
        if !s.neutral_value.is_finite() {
            return Err(Error::Config("scheduler.neutral_value must be finite".into()));
        }

        let d = &self.device;
        if !(d.output_min < d.output_max) {
            return Err(Error::Config(format!(
                "device output range is empty: [{}, {}]",
                d.output_min, d.output_max
            )));
        }
        if s.neutral_value < d.output_min || s.neutral_value > d.output_max {
            return Err(Error::Config(format!(
                "neutral value {} is outside the device output range [{}, {}]",
                s.neutral_value, d.output_min, d.output_max
            )));
        }
        let reach = d.output_max.abs().min(d.output_min.abs());
        if self.safety.max_amplitude > reach {
            return Err(Error::Config(format!(
                "safety.max_amplitude {} exceeds the device output range [{}, {}]",
                self.safety.max_amplitude, d.output_min, d.output_max
            )));
        }
        if self.safety.max_channel_count as usize > d.channels.len() {
            tracing::warn!(
                max_channel_count = self.safety.max_channel_count,
                device_channels = d.channels.len(),
                "Safety limit allows more channels than the device lists"
            );
        }
        Ok(())
    }
}

/// Physical safety limits checked before any pattern is compiled.
///
/// Loaded once at session start and read-only afterwards. Charge is in
/// amplitude units times seconds (volt-seconds for an analog output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum absolute output value
    #[serde(default = "default_max_amplitude")]
    pub max_amplitude: f64,

    /// Maximum width of a single pulse phase in nanoseconds
    #[serde(default = "default_max_pulse_width_ns")]
    pub max_pulse_width_ns: u64,

    /// Maximum fraction of time a channel may be active, in (0, 1]
    #[serde(default = "default_max_duty_cycle")]
    pub max_duty_cycle: f64,

    /// Maximum charge per pulse phase
    #[serde(default = "default_max_charge_per_pulse")]
    pub max_charge_per_pulse: f64,

    /// Maximum number of distinct output channels
    #[serde(default = "default_max_channel_count")]
    pub max_channel_count: u32,
}

impl SafetyLimits {
    /// Check that the limits themselves are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_amplitude.is_finite() && self.max_amplitude > 0.0) {
            return Err(Error::Config(format!(
                "safety.max_amplitude must be positive, got {}",
                self.max_amplitude
            )));
        }
        if self.max_pulse_width_ns == 0 {
            return Err(Error::Config("safety.max_pulse_width_ns cannot be 0".into()));
        }
        if !(self.max_duty_cycle > 0.0 && self.max_duty_cycle <= 1.0) {
            return Err(Error::Config(format!(
                "safety.max_duty_cycle must be in (0, 1], got {}",
                self.max_duty_cycle
            )));
        }
        if !(self.max_charge_per_pulse.is_finite() && self.max_charge_per_pulse > 0.0) {
            return Err(Error::Config(format!(
                "safety.max_charge_per_pulse must be positive, got {}",
                self.max_charge_per_pulse
            )));
        }
        if self.max_channel_count == 0 {
            return Err(Error::Config("safety.max_channel_count cannot be 0".into()));
        }
        Ok(())
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_amplitude: default_max_amplitude(),
            max_pulse_width_ns: default_max_pulse_width_ns(),
            max_duty_cycle: default_max_duty_cycle(),
            max_charge_per_pulse: default_max_charge_per_pulse(),
            max_channel_count: default_max_channel_count(),
        }
    }
}

fn default_max_amplitude() -> f64 {
    5.0
}

fn default_max_pulse_width_ns() -> u64 {
    1_000_000_000
}

fn default_max_duty_cycle() -> f64 {
    0.5
}

fn default_max_charge_per_pulse() -> f64 {
    1.0
}

fn default_max_channel_count() -> u32 {
    8
}

/// Sequence compiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Maximum number of events a single compile may produce
    #[serde(default = "default_max_events")]
    pub max_events: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

fn default_max_events() -> u64 {
    1_000_000
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Frames per lookahead segment
    #[serde(default = "default_segment_frames")]
    pub segment_frames: usize,

    /// Number of segments in the lookahead ring
    #[serde(default = "default_lookahead_segments")]
    pub lookahead_segments: usize,

    /// How long the real-time loop may wait on the device or renderer
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Sleep between polls while waiting, in microseconds
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,

    /// Output level when nothing is playing
    #[serde(default)]
    pub neutral_value: f64,

    /// Maximum allowed distance between an onset and its sample
    #[serde(default = "default_max_onset_error_ns")]
    pub max_onset_error_ns: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate_hz(),
            segment_frames: default_segment_frames(),
            lookahead_segments: default_lookahead_segments(),
            ready_timeout_ms: default_ready_timeout_ms(),
            poll_interval_us: default_poll_interval_us(),
            neutral_value: 0.0,
            max_onset_error_ns: default_max_onset_error_ns(),
        }
    }
}

fn default_sample_rate_hz() -> u32 {
    1_000
}

fn default_segment_frames() -> usize {
    256
}

fn default_lookahead_segments() -> usize {
    8
}

fn default_ready_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_us() -> u64 {
    200
}

fn default_max_onset_error_ns() -> u64 {
    500_000
}

/// Output device description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (e.g. Dev2)
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Analog output channel names, indexed by channel id
    #[serde(default = "default_device_channels")]
    pub channels: Vec<String>,

    /// Lowest value the output stage can produce
    #[serde(default = "default_output_min")]
    pub output_min: f64,

    /// Highest value the output stage can produce
    #[serde(default = "default_output_max")]
    pub output_max: f64,
}

impl DeviceConfig {
    /// Full physical path of a channel, e.g. `Dev2/ao0`.
    ///
    /// Blank device or channel names fall back to `Dev2` and `ao<id>`.
    pub fn physical_channel(&self, channel: u16) -> String {
        let dev = match self.name.trim() {
            "" => "Dev2",
            name => name,
        };
        let ch = self
            .channels
            .get(channel as usize)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("ao{}", channel));
        format!("{}/{}", dev, ch)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            channels: default_device_channels(),
            output_min: default_output_min(),
            output_max: default_output_max(),
        }
    }
}

fn default_device_name() -> String {
    "Dev2".into()
}

fn default_device_channels() -> Vec<String> {
    (0..8).map(|i| format!("ao{}", i)).collect()
}

fn default_output_min() -> f64 {
    -10.0
}

fn default_output_max() -> f64 {
    10.0
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write as _;

    /// Serializes tests that read or write STIMGEN_* variables.
    static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.sample_rate_hz, 1_000);
        assert_eq!(config.scheduler.neutral_value, 0.0);
        assert_eq!(config.device.name, "Dev2");
        assert_eq!(config.safety.max_duty_cycle, 0.5);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let mut bad_config = Config::default();
        bad_config.scheduler.sample_rate_hz = 0;
        assert!(bad_config.validate().is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let _env = ENV_LOCK.lock();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
safety:
  max_amplitude: 3.0
  max_duty_cycle: 0.1
scheduler:
  sample_rate_hz: 20000
device:
  name: "Dev1"
"#
        )
        .unwrap();

        let config = Config::load(Some(f.path())).unwrap();
        assert_eq!(config.safety.max_amplitude, 3.0);
        assert_eq!(config.safety.max_duty_cycle, 0.1);
        // Unspecified limits keep their defaults
        assert_eq!(config.safety.max_channel_count, 8);
        assert_eq!(config.scheduler.sample_rate_hz, 20_000);
        assert_eq!(config.device.name, "Dev1");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let _env = ENV_LOCK.lock();
        let path = std::path::Path::new("/tmp/does_not_exist_stimgen_test.yaml");
        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.scheduler.sample_rate_hz, 1_000);
    }

    #[test]
    fn test_config_load_invalid_yaml() {
        let _env = ENV_LOCK.lock();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{{{not: valid: yaml::::").unwrap();

        let result = Config::load(Some(f.path()));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_env_override_device_and_rate() {
        let _env = ENV_LOCK.lock();
        let mut config = Config::default();
        std::env::set_var("STIMGEN_DEVICE", "Dev7");
        std::env::set_var("STIMGEN_SAMPLE_RATE_HZ", "5000");
        config.apply_env_overrides();
        assert_eq!(config.device.name, "Dev7");
        assert_eq!(config.scheduler.sample_rate_hz, 5_000);
        std::env::remove_var("STIMGEN_DEVICE");
        std::env::remove_var("STIMGEN_SAMPLE_RATE_HZ");
    }

    #[test]
    fn test_env_override_ignores_unparsable_timeout() {
        let _env = ENV_LOCK.lock();
        let mut config = Config::default();
        std::env::set_var("STIMGEN_READY_TIMEOUT_MS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.scheduler.ready_timeout_ms, 100);
        std::env::remove_var("STIMGEN_READY_TIMEOUT_MS");
    }

    // =========================================================================
    // Safety limit validation
    // =========================================================================

    #[test]
    fn test_validate_duty_cycle_range() {
        let mut config = Config::default();
        config.safety.max_duty_cycle = 0.0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("max_duty_cycle"));

        config.safety.max_duty_cycle = 1.0;
        assert!(config.validate().is_ok());

        config.safety.max_duty_cycle = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_amplitude_beyond_device_range() {
        let mut config = Config::default();
        config.safety.max_amplitude = 12.0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("output range"));
    }

    #[test]
    fn test_validate_neutral_outside_range() {
        let mut config = Config::default();
        config.device.output_min = 0.0;
        config.scheduler.neutral_value = -1.0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("neutral value"));
    }

    #[test]
    fn test_validate_lookahead_too_small() {
        let mut config = Config::default();
        config.scheduler.lookahead_segments = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_physical_channel_defaults() {
        let mut device = DeviceConfig::default();
        assert_eq!(device.physical_channel(0), "Dev2/ao0");

        device.name = "  ".into();
        device.channels = vec!["".into(), "ao5".into()];
        assert_eq!(device.physical_channel(0), "Dev2/ao0");
        assert_eq!(device.physical_channel(1), "Dev2/ao5");
        assert_eq!(device.physical_channel(9), "Dev2/ao9");
    }

    #[test]
    fn test_safety_limits_defaults() {
        let limits = SafetyLimits::default();
        assert_eq!(limits.max_amplitude, 5.0);
        assert_eq!(limits.max_pulse_width_ns, 1_000_000_000);
        assert_eq!(limits.max_duty_cycle, 0.5);
        assert_eq!(limits.max_charge_per_pulse, 1.0);
        assert_eq!(limits.max_channel_count, 8);
    }
}
