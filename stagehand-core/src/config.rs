//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/stagehand/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/stagehand/` (~/.config/stagehand/)
//! - Data: `$XDG_DATA_HOME/stagehand/` (~/.local/share/stagehand/)
//! - State/Logs: `$XDG_STATE_HOME/stagehand/` (~/.local/state/stagehand/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Device transport settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Readiness thresholds
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Timeline compilation policy
    #[serde(default)]
    pub timeline: TimelineConfig,

    /// Record injection policy
    #[serde(default)]
    pub injection: InjectionConfig,

    /// Integrity verification policy
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================
// [device]
// ============================================

/// How to reach the attached device
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// adb executable (name on PATH or absolute path)
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,

    /// Device serial passed as `-s`; unset targets the only attached device
    #[serde(default)]
    pub serial: Option<String>,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Package whose permissions are granted and verified
    #[serde(default = "default_shell_package")]
    pub shell_package: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            command_timeout_secs: default_command_timeout(),
            shell_package: default_shell_package(),
        }
    }
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_command_timeout() -> u64 {
    10
}

fn default_shell_package() -> String {
    "com.android.shell".to_string()
}

// ============================================
// [diagnostics]
// ============================================

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    /// Lowest supported API level
    #[serde(default = "default_min_sdk")]
    pub min_sdk: u32,

    /// Free space on /data below which a warning is raised
    #[serde(default = "default_low_storage_mb")]
    pub low_storage_mb: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            min_sdk: default_min_sdk(),
            low_storage_mb: default_low_storage_mb(),
        }
    }
}

fn default_min_sdk() -> u32 {
    21
}

fn default_low_storage_mb() -> u64 {
    1000
}

// ============================================
// [timeline]
// ============================================

#[derive(Debug, Deserialize, Clone)]
pub struct TimelineConfig {
    /// Days of history the message replay is spread over
    #[serde(default = "default_day_span")]
    pub day_span: u32,

    /// First local hour an event may land in
    #[serde(default = "default_waking_start")]
    pub waking_start_hour: u32,

    /// Last local hour an event may land in
    #[serde(default = "default_waking_end")]
    pub waking_end_hour: u32,

    #[serde(default = "default_min_calls")]
    pub min_calls_per_pair: u32,

    #[serde(default = "default_max_calls")]
    pub max_calls_per_pair: u32,

    /// Calls are placed up to this many days before the anchor
    #[serde(default = "default_call_days_back")]
    pub call_days_back: u32,

    #[serde(default = "default_min_step")]
    pub min_step_minutes: u32,

    #[serde(default = "default_max_step")]
    pub max_step_minutes: u32,

    /// Chance per dialogue step of an extra multi-day jump
    #[serde(default = "default_gap_probability")]
    pub gap_probability: f64,

    #[serde(default = "default_min_gap_days")]
    pub min_gap_days: u32,

    #[serde(default = "default_max_gap_days")]
    pub max_gap_days: u32,

    /// Fixed UTC offset for the waking window; host local offset when unset
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,

    /// Chance that a non-missed call is a video call
    #[serde(default)]
    pub video_call_probability: f64,

    /// Longest dialogue line replayed into a group chat without its own lines
    #[serde(default = "default_group_line_max")]
    pub group_line_max_chars: usize,

    /// Context used for characters without one
    #[serde(default = "default_context")]
    pub default_context: String,

    /// RNG seed; entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            day_span: default_day_span(),
            waking_start_hour: default_waking_start(),
            waking_end_hour: default_waking_end(),
            min_calls_per_pair: default_min_calls(),
            max_calls_per_pair: default_max_calls(),
            call_days_back: default_call_days_back(),
            min_step_minutes: default_min_step(),
            max_step_minutes: default_max_step(),
            gap_probability: default_gap_probability(),
            min_gap_days: default_min_gap_days(),
            max_gap_days: default_max_gap_days(),
            utc_offset_minutes: None,
            video_call_probability: 0.0,
            group_line_max_chars: default_group_line_max(),
            default_context: default_context(),
            seed: None,
        }
    }
}

fn default_day_span() -> u32 {
    7
}

fn default_waking_start() -> u32 {
    7
}

fn default_waking_end() -> u32 {
    23
}

fn default_min_calls() -> u32 {
    1
}

fn default_max_calls() -> u32 {
    3
}

fn default_call_days_back() -> u32 {
    7
}

fn default_min_step() -> u32 {
    1
}

fn default_max_step() -> u32 {
    180
}

fn default_gap_probability() -> f64 {
    0.2
}

fn default_min_gap_days() -> u32 {
    1
}

fn default_max_gap_days() -> u32 {
    3
}

fn default_group_line_max() -> usize {
    100
}

fn default_context() -> String {
    "general".to_string()
}

// ============================================
// [injection]
// ============================================

/// Call duration bounds in seconds
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InjectionConfig {
    /// Pause after each SMS write
    #[serde(default = "default_sms_delay")]
    pub sms_delay_ms: u64,

    /// Pause after each MMS write
    #[serde(default = "default_sms_delay")]
    pub mms_delay_ms: u64,

    /// Pause after each call-log write
    #[serde(default = "default_call_delay")]
    pub call_delay_ms: u64,

    /// Number used when a character has no phone
    #[serde(default = "default_placeholder_number")]
    pub placeholder_number: String,

    /// `countryiso` column for vendor call logs
    #[serde(default = "default_country_iso")]
    pub country_iso: String,

    /// `geocoded_location` when the caller has no location
    #[serde(default = "default_geocode")]
    pub default_geocode: String,

    /// RNG seed for bodies and durations; entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Body templates per context, replacing the built-in set
    #[serde(default)]
    pub templates: HashMap<String, Vec<String>>,

    /// Duration profiles per context, replacing the built-in set
    #[serde(default)]
    pub durations: HashMap<String, DurationRange>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            sms_delay_ms: default_sms_delay(),
            mms_delay_ms: default_sms_delay(),
            call_delay_ms: default_call_delay(),
            placeholder_number: default_placeholder_number(),
            country_iso: default_country_iso(),
            default_geocode: default_geocode(),
            seed: None,
            templates: HashMap::new(),
            durations: HashMap::new(),
        }
    }
}

fn default_sms_delay() -> u64 {
    1000
}

fn default_call_delay() -> u64 {
    500
}

fn default_placeholder_number() -> String {
    "5551234".to_string()
}

fn default_country_iso() -> String {
    "US".to_string()
}

fn default_geocode() -> String {
    "United States".to_string()
}

// ============================================
// [verification]
// ============================================

#[derive(Debug, Deserialize, Clone)]
pub struct VerificationConfig {
    /// Most recent rows read back by the content check
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Night window start hour (inclusive)
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,

    /// Night window end hour (exclusive)
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,

    /// Maximum share of messages allowed in the night window
    #[serde(default = "default_night_ratio")]
    pub night_ratio_threshold: f64,

    /// Contacts with fewer SMS rows are not judged by the interactions check
    #[serde(default = "default_interaction_min")]
    pub interaction_min_messages: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
            night_ratio_threshold: default_night_ratio(),
            interaction_min_messages: default_interaction_min(),
        }
    }
}

fn default_sample_size() -> usize {
    100
}

fn default_night_start() -> u32 {
    2
}

fn default_night_end() -> u32 {
    6
}

fn default_night_ratio() -> f64 {
    0.10
}

fn default_interaction_min() -> usize {
    2
}

// ============================================
// [logging]
// ============================================

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of session log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    10
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a phase misbehave
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeline;
        check_hour("timeline.waking_start_hour", t.waking_start_hour)?;
        check_hour("timeline.waking_end_hour", t.waking_end_hour)?;
        if t.waking_start_hour > t.waking_end_hour {
            return Err(Error::Config(
                "timeline.waking_start_hour must not be after waking_end_hour".to_string(),
            ));
        }
        check_range(
            "timeline.*_calls_per_pair",
            t.min_calls_per_pair,
            t.max_calls_per_pair,
        )?;
        check_range(
            "timeline.*_step_minutes",
            t.min_step_minutes,
            t.max_step_minutes,
        )?;
        check_range("timeline.*_gap_days", t.min_gap_days, t.max_gap_days)?;
        if !(0.0..=1.0).contains(&t.gap_probability) {
            return Err(Error::Config(
                "timeline.gap_probability must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&t.video_call_probability) {
            return Err(Error::Config(
                "timeline.video_call_probability must be between 0 and 1".to_string(),
            ));
        }
        if let Some(offset) = t.utc_offset_minutes {
            if offset.abs() >= 24 * 60 {
                return Err(Error::Config(
                    "timeline.utc_offset_minutes must be within one day".to_string(),
                ));
            }
        }

        for (context, range) in &self.injection.durations {
            check_range(&format!("injection.durations.{}", context), range.min, range.max)?;
        }
        if self.injection.templates.values().any(|t| t.is_empty()) {
            return Err(Error::Config(
                "injection.templates entries must not be empty".to_string(),
            ));
        }

        let v = &self.verification;
        if v.sample_size == 0 {
            return Err(Error::Config(
                "verification.sample_size must be at least 1".to_string(),
            ));
        }
        check_hour("verification.night_start_hour", v.night_start_hour)?;
        if v.night_end_hour > 24 || v.night_start_hour >= v.night_end_hour {
            return Err(Error::Config(
                "verification night window must satisfy start < end <= 24".to_string(),
            ));
        }
        if !(v.night_ratio_threshold > 0.0 && v.night_ratio_threshold <= 1.0) {
            return Err(Error::Config(
                "verification.night_ratio_threshold must be in (0, 1]".to_string(),
            ));
        }

        if self.device.command_timeout_secs == 0 {
            return Err(Error::Config(
                "device.command_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/stagehand/config.toml` (~/.config/stagehand/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("stagehand").join("config.toml")
    }

    /// Returns the data directory path (ledger, reports, backups, exports)
    ///
    /// `$XDG_DATA_HOME/stagehand/` (~/.local/share/stagehand/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("stagehand")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/stagehand/` (~/.local/state/stagehand/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("stagehand")
    }

    /// Returns the ledger database path
    ///
    /// `$XDG_DATA_HOME/stagehand/ledger.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("ledger.db")
    }

    pub fn reports_dir() -> PathBuf {
        Self::data_dir().join("reports")
    }

    pub fn backups_dir() -> PathBuf {
        Self::data_dir().join("backups")
    }

    pub fn exports_dir() -> PathBuf {
        Self::data_dir().join("exports")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Called by the CLI before anything reads these paths.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

fn check_hour(field: &str, hour: u32) -> Result<()> {
    if hour > 23 {
        return Err(Error::Config(format!("{} must be between 0 and 23", field)));
    }
    Ok(())
}

fn check_range(field: &str, min: u32, max: u32) -> Result<()> {
    if min > max {
        return Err(Error::Config(format!(
            "{}: min ({}) must not exceed max ({})",
            field, min, max
        )));
    }
    Ok(())
}
