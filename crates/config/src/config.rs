//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

const DEFAULT_MAX_DURATION_SECS: u64 = 5;
const MAX_DURATION_CEILING_SECS: u64 = 30;
const DEFAULT_VIDEO_QUALITY: u32 = 23;
const DEFAULT_TARGET_WIDTH: u32 = 1280;
const DEFAULT_TARGET_HEIGHT: u32 = 720;
const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAINTENANCE_TICKS: u64 = 300;

/// How the daemon picks an animation when no explicit one is configured
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RandomizeMode {
    /// Leave the destination untouched unless an explicit animation is set
    #[default]
    Disabled,
    /// Pick a random clip for every target independently
    PerBoot,
    /// Pick one animation set and take every target's clip from it
    PerSet,
}

impl std::fmt::Display for RandomizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RandomizeMode::Disabled => write!(f, "disabled"),
            RandomizeMode::PerBoot => write!(f, "per_boot"),
            RandomizeMode::PerSet => write!(f, "per_set"),
        }
    }
}

impl std::str::FromStr for RandomizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "disabled" | "off" => Ok(RandomizeMode::Disabled),
            "per_boot" => Ok(RandomizeMode::PerBoot),
            "per_set" => Ok(RandomizeMode::PerSet),
            other => Err(format!("unknown randomize mode '{}'", other)),
        }
    }
}

/// Filesystem layout used by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Directory holding animation sets (one subdirectory per set)
    #[serde(default = "default_animations_dir")]
    pub animations_dir: PathBuf,
    /// Flat directory of downloaded boot clips
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    /// Directory the Steam client reads override movies from
    #[serde(default = "default_override_dir")]
    pub override_dir: PathBuf,
    /// Content-addressed transcode cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Per-target copies of optimized clips that get attached to the overrides
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Single-instance lock file, also holds the daemon PID
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

fn default_animations_dir() -> PathBuf {
    PathBuf::from("/home/deck/.local/share/steam-animation-manager/animations")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("/home/deck/.local/share/steam-animation-manager/downloads")
}

fn default_override_dir() -> PathBuf {
    PathBuf::from("/home/deck/.steam/root/config/uioverrides/movies")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/steam-animation-cache")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/tmp/steam-animation-cache/staging")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/tmp/steam-animation-daemon.lock")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            animations_dir: default_animations_dir(),
            downloads_dir: default_downloads_dir(),
            override_dir: default_override_dir(),
            cache_dir: default_cache_dir(),
            staging_dir: default_staging_dir(),
            lock_file: default_lock_file(),
        }
    }
}

/// Animation choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnimationsConfig {
    /// Explicit boot clip; wins over randomization when the file exists
    #[serde(default)]
    pub current_boot: Option<PathBuf>,
    /// Explicit suspend clip
    #[serde(default)]
    pub current_suspend: Option<PathBuf>,
    /// Explicit in-game suspend (throbber) clip
    #[serde(default)]
    pub current_throbber: Option<PathBuf>,
    #[serde(default)]
    pub randomize_mode: RandomizeMode,
    /// File names, relative paths or set names never picked at random
    #[serde(default)]
    pub shuffle_exclusions: Vec<String>,
}

/// Transcode parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    /// Clips are truncated to this many seconds (1-30)
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// VP9 CRF value (10-50, lower is better)
    #[serde(default = "default_video_quality")]
    pub video_quality: u32,
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    #[serde(default = "default_target_height")]
    pub target_height: u32,
    /// ffmpeg binary, looked up in PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_max_duration_secs() -> u64 {
    DEFAULT_MAX_DURATION_SECS
}

fn default_video_quality() -> u32 {
    DEFAULT_VIDEO_QUALITY
}

fn default_target_width() -> u32 {
    DEFAULT_TARGET_WIDTH
}

fn default_target_height() -> u32 {
    DEFAULT_TARGET_HEIGHT
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            video_quality: default_video_quality(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Transcode cache bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_cache_max_age_days")]
    pub max_age_days: u64,
}

fn default_cache_max_size_mb() -> u64 {
    DEFAULT_CACHE_MAX_SIZE_MB
}

fn default_cache_max_age_days() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_cache_max_size_mb(),
            max_age_days: default_cache_max_age_days(),
        }
    }
}

/// Event detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Exact process name whose presence means the client is running
    #[serde(default = "default_process_name")]
    pub process_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll ticks between cache maintenance runs
    #[serde(default = "default_maintenance_ticks")]
    pub maintenance_ticks: u64,
    /// systemd units followed for sleep/wake messages
    #[serde(default = "default_journal_units")]
    pub journal_units: Vec<String>,
    /// Case-insensitive substrings marking a suspend line
    #[serde(default = "default_suspend_keywords")]
    pub suspend_keywords: Vec<String>,
    /// Case-insensitive substrings marking a resume line
    #[serde(default = "default_resume_keywords")]
    pub resume_keywords: Vec<String>,
}

fn default_process_name() -> String {
    "steam".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_maintenance_ticks() -> u64 {
    DEFAULT_MAINTENANCE_TICKS
}

fn default_journal_units() -> Vec<String> {
    vec![
        "systemd-suspend.service".to_string(),
        "systemd-hibernate.service".to_string(),
        "systemd-suspend-then-hibernate.service".to_string(),
    ]
}

fn default_suspend_keywords() -> Vec<String> {
    vec![
        "Entering sleep state".to_string(),
        "Performing sleep operation".to_string(),
        "Suspending system".to_string(),
    ]
}

fn default_resume_keywords() -> Vec<String> {
    vec![
        "System returned from sleep".to_string(),
        "System resumed".to_string(),
    ]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            poll_interval_ms: default_poll_interval_ms(),
            maintenance_ticks: default_maintenance_ticks(),
            journal_units: default_journal_units(),
            suspend_keywords: default_suspend_keywords(),
            resume_keywords: default_resume_keywords(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub animations: AnimationsConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Write the configuration as pretty TOML, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STEAM_ANIM_RANDOMIZE_MODE -> animations.randomize_mode
    /// - STEAM_ANIM_MAX_DURATION_SECS -> transcode.max_duration_secs
    /// - STEAM_ANIM_VIDEO_QUALITY -> transcode.video_quality
    /// - STEAM_ANIM_CACHE_MAX_SIZE_MB -> cache.max_size_mb
    /// - STEAM_ANIM_PROCESS_NAME -> monitor.process_name
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("STEAM_ANIM_RANDOMIZE_MODE") {
            if let Ok(mode) = val.parse::<RandomizeMode>() {
                self.animations.randomize_mode = mode;
            }
        }

        if let Ok(val) = env::var("STEAM_ANIM_MAX_DURATION_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.transcode.max_duration_secs = secs;
            }
        }

        if let Ok(val) = env::var("STEAM_ANIM_VIDEO_QUALITY") {
            if let Ok(crf) = val.parse::<u32>() {
                self.transcode.video_quality = crf;
            }
        }

        if let Ok(val) = env::var("STEAM_ANIM_CACHE_MAX_SIZE_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                self.cache.max_size_mb = mb;
            }
        }

        if let Ok(val) = env::var("STEAM_ANIM_PROCESS_NAME") {
            if !val.trim().is_empty() {
                self.monitor.process_name = val.trim().to_string();
            }
        }
    }

    /// Replace out-of-range values with defaults
    ///
    /// Returns one message per corrected value; nothing here is fatal.
    pub fn validate_and_fix(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();

        if self.transcode.max_duration_secs == 0 {
            fixes.push("max_duration_secs is 0, using default".to_string());
            self.transcode.max_duration_secs = DEFAULT_MAX_DURATION_SECS;
        } else if self.transcode.max_duration_secs > MAX_DURATION_CEILING_SECS {
            fixes.push(format!(
                "max_duration_secs {} too long, limiting to {}",
                self.transcode.max_duration_secs, MAX_DURATION_CEILING_SECS
            ));
            self.transcode.max_duration_secs = MAX_DURATION_CEILING_SECS;
        }

        if !(10..=50).contains(&self.transcode.video_quality) {
            fixes.push(format!(
                "video_quality {} outside 10-50, using default",
                self.transcode.video_quality
            ));
            self.transcode.video_quality = DEFAULT_VIDEO_QUALITY;
        }

        if self.transcode.target_width < 2 || self.transcode.target_height < 2 {
            fixes.push(format!(
                "target resolution {}x{} invalid, using {}x{}",
                self.transcode.target_width,
                self.transcode.target_height,
                DEFAULT_TARGET_WIDTH,
                DEFAULT_TARGET_HEIGHT
            ));
            self.transcode.target_width = DEFAULT_TARGET_WIDTH;
            self.transcode.target_height = DEFAULT_TARGET_HEIGHT;
        }

        // yuv420p needs even frame dimensions
        let (width, height) = (self.transcode.target_width, self.transcode.target_height);
        if width % 2 != 0 || height % 2 != 0 {
            fixes.push(format!(
                "target resolution {}x{} is odd, using {}x{}",
                width,
                height,
                width & !1,
                height & !1
            ));
            self.transcode.target_width = width & !1;
            self.transcode.target_height = height & !1;
        }

        if self.cache.max_size_mb == 0 {
            fixes.push("cache max_size_mb is 0, using default".to_string());
            self.cache.max_size_mb = DEFAULT_CACHE_MAX_SIZE_MB;
        }

        if self.monitor.poll_interval_ms == 0 {
            fixes.push("poll_interval_ms is 0, using default".to_string());
            self.monitor.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }

        if self.monitor.maintenance_ticks == 0 {
            fixes.push("maintenance_ticks is 0, using default".to_string());
            self.monitor.maintenance_ticks = DEFAULT_MAINTENANCE_TICKS;
        }

        fixes
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        for fix in config.validate_and_fix() {
            warn!("{}", fix);
        }
        Ok(config)
    }

    /// Like [`Config::load`], but writes a default file first when none exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "Config file not found at {}, writing defaults",
                path.display()
            );
            Config::default().save(path)?;
        }
        Self::load(path)
    }

    /// Maximum clip length as a Duration
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.transcode.max_duration_secs)
    }

    /// Cache size cap in bytes
    pub fn max_cache_bytes(&self) -> u64 {
        self.cache.max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Cache entry lifetime
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_days.saturating_mul(24 * 3600))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    /// Directories the daemon expects to exist
    pub fn required_dirs(&self) -> [&Path; 5] {
        [
            &self.paths.animations_dir,
            &self.paths.downloads_dir,
            &self.paths.override_dir,
            &self.paths.cache_dir,
            &self.paths.staging_dir,
        ]
    }
}
