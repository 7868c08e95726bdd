use crate::domain::models::ScaleRange;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tracing output. `RUST_LOG` overrides `level` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "enabled")]
    pub console: bool,
    /// `None` disables the rolling log file.
    #[serde(default = "default_log_file")]
    pub file: Option<LogFileSettings>,
    #[serde(default = "enabled")]
    pub ansi_colors: bool,
    #[serde(default)]
    pub show_source_location: bool,
    #[serde(default)]
    pub show_thread_ids: bool,
    #[serde(default = "enabled")]
    pub show_target: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console: true,
            file: default_log_file(),
            ansi_colors: true,
            show_source_location: false,
            show_thread_ids: false,
            show_target: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileSettings {
    #[serde(default = "default_log_dir")]
    pub directory: String,
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            prefix: default_log_prefix(),
            rotation: LogRotation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

fn enabled() -> bool {
    true
}
fn default_level() -> String {
    "info".to_string()
}
fn default_log_file() -> Option<LogFileSettings> {
    Some(LogFileSettings::default())
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_prefix() -> String {
    "heart_rate_monitor".to_string()
}

/// Chart scale policy: margin is `max(round(range * margin_fraction), min_margin)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSettings {
    #[serde(default = "default_margin_fraction")]
    pub margin_fraction: f64,
    #[serde(default = "default_min_margin")]
    pub min_margin: i32,
    #[serde(default = "default_scale_lower")]
    pub default_lower: i32,
    #[serde(default = "default_scale_upper")]
    pub default_upper: i32,
}

impl ScaleSettings {
    pub fn default_range(&self) -> ScaleRange {
        ScaleRange {
            lower: self.default_lower,
            upper: self.default_upper,
        }
    }

    pub fn margin_for(&self, range: i32) -> i32 {
        let proportional = (f64::from(range) * self.margin_fraction).round() as i32;
        proportional.max(self.min_margin)
    }
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            margin_fraction: default_margin_fraction(),
            min_margin: default_min_margin(),
            default_lower: default_scale_lower(),
            default_upper: default_scale_upper(),
        }
    }
}

fn default_margin_fraction() -> f64 {
    0.1
}
fn default_min_margin() -> i32 {
    5
}
fn default_scale_lower() -> i32 {
    40
}
fn default_scale_upper() -> i32 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_min_valid_rate")]
    pub min_valid_rate: u16,
    #[serde(default = "default_max_valid_rate")]
    pub max_valid_rate: u16,
    /// `None` keeps the whole session in memory.
    #[serde(default)]
    pub history_capacity: Option<usize>,
    #[serde(default)]
    pub scale: ScaleSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_valid_rate: default_min_valid_rate(),
            max_valid_rate: default_max_valid_rate(),
            history_capacity: None,
            scale: ScaleSettings::default(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_min_valid_rate() -> u16 {
    1
}
fn default_max_valid_rate() -> u16 {
    299
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Falls back to the user's documents directory.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default = "default_zone_abbreviation")]
    pub zone_abbreviation: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl RecordingSettings {
    pub fn file_path(&self) -> PathBuf {
        let directory = self
            .directory
            .as_ref()
            .map(PathBuf::from)
            .or_else(dirs::document_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        directory.join(&self.file_name)
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: default_file_name(),
            zone_abbreviation: default_zone_abbreviation(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_file_name() -> String {
    "HeartRateData.txt".to_string()
}
fn default_zone_abbreviation() -> String {
    "UTC".to_string()
}

/// Parameters of the simulated sensor used by the headless runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_base_rate")]
    pub base_rate: u16,
    #[serde(default = "default_variability")]
    pub variability: u16,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default = "default_session_secs")]
    pub session_secs: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            base_rate: default_base_rate(),
            variability: default_variability(),
            connect_delay_ms: default_connect_delay_ms(),
            session_secs: default_session_secs(),
        }
    }
}

fn default_device_id() -> String {
    "8C4CAD2D".to_string()
}
fn default_base_rate() -> u16 {
    72
}
fn default_variability() -> u16 {
    6
}
fn default_connect_delay_ms() -> u64 {
    500
}
fn default_session_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub known_device_ids: Vec<String>,
    #[serde(default)]
    pub last_connected_device_id: Option<String>,

    #[serde(default)]
    pub logging: LogSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub recording: RecordingSettings,

    #[serde(default)]
    pub simulation: SimulationSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing
    /// or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HeartRateMonitor");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn remember_device(&mut self, device_id: &str) -> anyhow::Result<()> {
        if !self
            .settings
            .known_device_ids
            .iter()
            .any(|known| known == device_id)
        {
            self.settings.known_device_ids.push(device_id.to_string());
        }
        self.settings.last_connected_device_id = Some(device_id.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "session": { "history_capacity": 120 } }"#).unwrap();

        let service = SettingsService::with_path(path);
        let settings = service.get();
        assert_eq!(settings.session.history_capacity, Some(120));
        assert_eq!(settings.session.tick_interval_ms, 1000);
        assert_eq!(settings.session.max_valid_rate, 299);
        assert_eq!(settings.recording.file_name, "HeartRateData.txt");
        assert_eq!(settings.logging.level, "info");
        assert_eq!(
            settings.logging.file.as_ref().map(|file| file.rotation),
            Some(LogRotation::Daily)
        );
    }

    #[test]
    fn test_log_file_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "logging": { "level": "debug", "file": null } }"#,
        )
        .unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().logging.level, "debug");
        assert!(service.get().logging.file.is_none());
        assert!(service.get().logging.console);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().simulation.base_rate, 72);
    }

    #[test]
    fn test_remember_device_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.remember_device("A1").unwrap();
        service.remember_device("B2").unwrap();
        service.remember_device("A1").unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().known_device_ids, vec!["A1", "B2"]);
        assert_eq!(
            reloaded.get().last_connected_device_id.as_deref(),
            Some("A1")
        );
    }

    #[test]
    fn test_margin_policy() {
        let scale = ScaleSettings::default();
        assert_eq!(scale.margin_for(0), 5);
        assert_eq!(scale.margin_for(40), 5);
        assert_eq!(scale.margin_for(120), 12);
    }
}
