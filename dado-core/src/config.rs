//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/dado/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/dado/` (~/.config/dado/)
//! - Data: `$XDG_DATA_HOME/dado/` (~/.local/share/dado/)
//! - State/Logs: `$XDG_STATE_HOME/dado/` (~/.local/state/dado/)

use crate::error::{Error, Result};
use serde::Deserialize;
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
    /// Camera connection settings
    #[serde(default)]
    pub camera: CameraConfig,

    /// Activity classifier thresholds
    #[serde(default)]
    pub motion: MotionConfig,

    /// Local file layout
    #[serde(default)]
    pub output: OutputConfig,

    /// Marker files for manual requests
    #[serde(default)]
    pub manual: ManualConfig,

    /// ffmpeg concatenation
    #[serde(default)]
    pub merge: MergeConfig,

    /// Polling loop behaviour
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Camera connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// Host name or IP address of the device
    #[serde(default = "default_camera_address")]
    pub address: String,

    #[serde(default = "default_camera_port")]
    pub port: u16,

    /// Path prefix for API actions, the action name is appended verbatim
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Retries for downloads of thumbnails and recordings
    #[serde(default = "default_http_retries")]
    pub http_retries: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Replaces `.mp4` in a recording name to get its thumbnail name
    #[serde(default = "default_thumbnail_extension")]
    pub thumbnail_extension: String,

    /// Synchronise the device clock with the host
    #[serde(default)]
    pub time_set: bool,

    /// Drift in seconds tolerated before the clock is reset
    #[serde(default)]
    pub time_set_max_drift: Option<u64>,

    /// strftime format of dates embedded in event image names
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Date format name the device expects when setting its clock
    #[serde(default = "default_internal_date_format")]
    pub internal_date_format: String,

    #[serde(default = "default_internal_language")]
    pub internal_language: String,

    /// Offset the device adds to its epoch timestamps; host offset if unset
    #[serde(default)]
    pub utc_offset_secs: Option<i64>,

    #[serde(default = "default_camera_user")]
    pub user: String,

    #[serde(default = "default_camera_user")]
    pub password: String,

    #[serde(default = "default_camera_uid")]
    pub uid: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            address: default_camera_address(),
            port: default_camera_port(),
            api_path: default_api_path(),
            http_retries: default_http_retries(),
            timeout_secs: default_timeout_secs(),
            thumbnail_extension: default_thumbnail_extension(),
            time_set: false,
            time_set_max_drift: None,
            date_format: default_date_format(),
            internal_date_format: default_internal_date_format(),
            internal_language: default_internal_language(),
            utc_offset_secs: None,
            user: default_camera_user(),
            password: default_camera_user(),
            uid: default_camera_uid(),
        }
    }
}

impl CameraConfig {
    /// Base URL of the device, e.g. `http://193.168.0.1:80`
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

fn default_camera_address() -> String {
    "193.168.0.1".to_string()
}

fn default_camera_port() -> u16 {
    80
}

fn default_api_path() -> String {
    "vcam/cmd.cgi?cmd=".to_string()
}

fn default_http_retries() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_thumbnail_extension() -> String {
    "_T.jpg".to_string()
}

fn default_date_format() -> String {
    "%Y%m%d%H%M%S".to_string()
}

fn default_internal_date_format() -> String {
    "yyyyMMddHHmmss".to_string()
}

fn default_internal_language() -> String {
    "en".to_string()
}

fn default_camera_user() -> String {
    "admin".to_string()
}

fn default_camera_uid() -> String {
    "c95696e23897d9ca".to_string()
}

/// Activity classifier thresholds
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MotionConfig {
    /// A frame is triggered when its dissimilarity is strictly above this
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Further triggered frames needed after the first to confirm a start
    #[serde(default = "default_start_count")]
    pub start_count: i64,

    /// Further quiet frames needed after the first to confirm an end
    #[serde(default = "default_stop_count")]
    pub stop_count: i64,

    /// Seconds after which an ongoing recording is split
    #[serde(default = "default_maximum_video_length")]
    pub maximum_video_length: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            start_count: default_start_count(),
            stop_count: default_stop_count(),
            maximum_video_length: default_maximum_video_length(),
        }
    }
}

fn default_sensitivity() -> f64 {
    30.0
}

fn default_start_count() -> i64 {
    2
}

fn default_stop_count() -> i64 {
    3
}

fn default_maximum_video_length() -> u64 {
    300
}

/// Largest `maximum_video_length` a `chrono::TimeDelta` can hold
pub const MAX_VIDEO_LENGTH_SECS: u64 = (i64::MAX / 1000) as u64;

/// Local file layout
///
/// Templates are strftime patterns rendered against the item's local start
/// time; `{name}` and `{stem}` expand to the remote file name and its stem.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Root directory for everything dado writes
    #[serde(default = "default_output_root")]
    pub root: PathBuf,

    #[serde(default = "default_thumbnail_template")]
    pub thumbnail: String,

    #[serde(default = "default_recording_template")]
    pub recording: String,

    #[serde(default = "default_event_template")]
    pub event: String,

    /// Merged output, without extension
    #[serde(default = "default_merged_template")]
    pub merged: String,

    #[serde(default = "default_list_extension")]
    pub list_extension: String,

    #[serde(default = "default_recording_extension")]
    pub recording_extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            thumbnail: default_thumbnail_template(),
            recording: default_recording_template(),
            event: default_event_template(),
            merged: default_merged_template(),
            list_extension: default_list_extension(),
            recording_extension: default_recording_extension(),
        }
    }
}

fn default_output_root() -> PathBuf {
    home_dir().join("dashcam")
}

fn default_thumbnail_template() -> String {
    ".thumbnails/%Y-%m-%d/{name}".to_string()
}

fn default_recording_template() -> String {
    ".recordings/%Y-%m-%d/{name}".to_string()
}

fn default_event_template() -> String {
    "events/%Y-%m-%d/{name}".to_string()
}

fn default_merged_template() -> String {
    "%Y-%m-%d/%Y-%m-%d-%H%M%S".to_string()
}

fn default_list_extension() -> String {
    ".txt".to_string()
}

fn default_recording_extension() -> String {
    ".mp4".to_string()
}

/// Marker files for manual requests
#[derive(Debug, Deserialize, Clone)]
pub struct ManualConfig {
    /// File extension of marker files, matched case-insensitively
    #[serde(default = "default_manual_extension")]
    pub extension: String,

    /// Regex with three groups: date, start time, end time
    #[serde(default = "default_manual_pattern")]
    pub pattern: String,

    /// chrono format for `"{date}-{time}"`
    #[serde(default = "default_manual_timestamp_format")]
    pub timestamp_format: String,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            extension: default_manual_extension(),
            pattern: default_manual_pattern(),
            timestamp_format: default_manual_timestamp_format(),
        }
    }
}

fn default_manual_extension() -> String {
    ".request".to_string()
}

fn default_manual_pattern() -> String {
    r"(\d{4}-\d{2}-\d{2})-(\d{4})-(\d{4})".to_string()
}

fn default_manual_timestamp_format() -> String {
    "%Y-%m-%d-%H%M".to_string()
}

/// ffmpeg concatenation
#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ffmpeg_log_level")]
    pub ffmpeg_log_level: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_log_level: default_ffmpeg_log_level(),
        }
    }
}

fn default_ffmpeg_log_level() -> String {
    "info".to_string()
}

/// Polling loop behaviour
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Seconds to sleep between polling cycles
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval_secs: u64,

    #[serde(default)]
    pub download_events: bool,

    #[serde(default = "default_true")]
    pub download_recordings: bool,

    #[serde(default = "default_true")]
    pub process_manual_requests: bool,

    #[serde(default = "default_true")]
    pub process_motion_detection: bool,

    /// Download every unprocessed recording, not only active ones
    #[serde(default)]
    pub force_download_all: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sleep_interval_secs: default_sleep_interval(),
            download_events: false,
            download_recordings: true,
            process_manual_requests: true,
            process_motion_detection: true,
            force_download_all: false,
        }
    }
}

fn default_sleep_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
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
    5
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

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let needs_camera = self.daemon.download_recordings || self.daemon.download_events;
        if needs_camera && self.camera.address.trim().is_empty() {
            return Err(Error::Config(
                "camera.address is required when downloads are enabled".to_string(),
            ));
        }
        if self.motion.sensitivity.is_nan() || self.motion.sensitivity < 0.0 {
            return Err(Error::Config(
                "motion.sensitivity must be zero or positive".to_string(),
            ));
        }
        if self.motion.maximum_video_length == 0 {
            return Err(Error::Config(
                "motion.maximum_video_length must be at least one second".to_string(),
            ));
        }
        if self.motion.maximum_video_length > MAX_VIDEO_LENGTH_SECS {
            return Err(Error::Config(format!(
                "motion.maximum_video_length must be at most {} seconds",
                MAX_VIDEO_LENGTH_SECS
            )));
        }
        regex::Regex::new(&self.manual.pattern)
            .map_err(|e| Error::Config(format!("invalid manual.pattern: {}", e)))?;
        for template in [
            &self.output.thumbnail,
            &self.output.recording,
            &self.output.event,
            &self.output.merged,
        ] {
            crate::paths::validate_template(template)?;
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/dado/config.toml` (~/.config/dado/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("dado").join("config.toml")
    }

    /// Returns the data directory path (for the state database)
    ///
    /// `$XDG_DATA_HOME/dado/` (~/.local/share/dado/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("dado")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/dado/` (~/.local/state/dado/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("dado")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/dado/state.db` (~/.local/share/dado/state.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.motion.sensitivity, 30.0);
        assert_eq!(config.motion.start_count, 2);
        assert_eq!(config.motion.stop_count, 3);
        assert_eq!(config.motion.maximum_video_length, 300);
        assert_eq!(config.camera.port, 80);
        assert!(config.daemon.download_recordings);
        assert!(!config.daemon.force_download_all);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[camera]
address = "10.0.0.7"
time_set = true
time_set_max_drift = 5

[motion]
sensitivity = 12.5
start_count = 1
stop_count = 1
maximum_video_length = 120

[daemon]
sleep_interval_secs = 15
download_events = true

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.camera.address, "10.0.0.7");
        assert_eq!(config.camera.endpoint(), "http://10.0.0.7:80");
        assert!(config.camera.time_set);
        assert_eq!(config.camera.time_set_max_drift, Some(5));
        assert_eq!(config.motion.sensitivity, 12.5);
        assert_eq!(config.motion.maximum_video_length, 120);
        assert_eq!(config.daemon.sleep_interval_secs, 15);
        assert!(config.daemon.download_events);
        assert!(config.daemon.process_motion_detection);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.motion.sensitivity = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.maximum_video_length = 0;
        assert!(config.validate().is_err());

        config.motion.maximum_video_length = MAX_VIDEO_LENGTH_SECS;
        assert!(config.validate().is_ok());
        config.motion.maximum_video_length = MAX_VIDEO_LENGTH_SECS + 1;
        assert!(config.validate().is_err());
        config.motion.maximum_video_length = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.camera.address = "  ".to_string();
        assert!(config.validate().is_err());

        // No camera needed when nothing is downloaded
        config.daemon.download_recordings = false;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.manual.pattern = "(unclosed".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.merged = "%Y-%Q".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[merge]\nenabled = false\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.merge.enabled);
        assert_eq!(config.merge.ffmpeg_log_level, "info");

        std::fs::write(&path, "[motion\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
