use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "blinky_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Device session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Queue depth cap; `0` accepts any number of pending operations.
    #[serde(default = "default_max_pending_operations")]
    pub max_pending_operations: usize,
    /// Cadence of the host's battery refresh timer. `0` disables polling.
    #[serde(default = "default_battery_refresh_interval_ms")]
    pub battery_refresh_interval_ms: u64,
}

impl SessionSettings {
    pub fn queue_limit(&self) -> Option<usize> {
        (self.max_pending_operations > 0).then_some(self.max_pending_operations)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_pending_operations: default_max_pending_operations(),
            battery_refresh_interval_ms: default_battery_refresh_interval_ms(),
        }
    }
}

fn default_max_pending_operations() -> usize {
    64
}
fn default_battery_refresh_interval_ms() -> u64 {
    1000
}

/// Radio backend behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_notification_retries")]
    pub notification_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Always bypass the platform GATT cache during discovery.
    #[serde(default = "default_false")]
    pub use_uncached_discovery: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            notification_retries: default_notification_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            use_uncached_discovery: default_false(),
        }
    }
}

fn default_notification_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Peer to connect to when none is given on the command line.
    #[serde(default)]
    pub peer_address: Option<String>,

    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub transport: TransportSettings,
}

/// Read-only access to `settings.json`. Nothing is ever written back.
pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    pub fn from_path(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = path.into();
        let settings = Self::load_from_file(&settings_path)?;
        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BlinkyController");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
