//! Recorder configuration
//!
//! Typed configuration for the camera, ring buffer, trigger sources and the
//! save window. Every field has a default, so a partial JSON file only needs
//! to name the values it changes.

use crate::trigger::TriggerType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config key not found: {section}.{key}")]
    MissingKey { section: String, key: String },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Camera defaults and requested capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index opened when none is given explicitly
    pub default_device: u32,

    /// Requested frame width (the device may negotiate another value)
    pub frame_width: u32,

    /// Requested frame height
    pub frame_height: u32,

    /// Requested frames per second
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_device: 0,
            frame_width: 640,
            frame_height: 480,
            fps: 30,
        }
    }
}

/// Save window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Seconds kept before the trigger
    pub default_before_time: u32,

    /// Seconds recorded after the trigger
    pub default_after_time: u32,

    /// Upper bound for either window
    pub max_time: u32,

    /// Lower bound for either window
    pub min_time: u32,

    /// Directory clips are written to
    pub output_dir: PathBuf,

    /// Extra time the post-trigger wait may take beyond `after` seconds
    pub post_trigger_grace_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            default_before_time: 5,
            default_after_time: 5,
            max_time: 30,
            min_time: 1,
            output_dir: PathBuf::from("recordings"),
            post_trigger_grace_ms: 3000,
        }
    }
}

/// Which GPIO implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackendKind {
    /// Character device if present, sysfs otherwise
    #[default]
    Auto,
    /// Linux GPIO character device (`/dev/gpiochipN`)
    Cdev,
    /// Legacy `/sys/class/gpio` interface
    Sysfs,
}

/// Trigger selection and per-source parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub default_type: TriggerType,

    /// Types that may be selected at runtime
    pub available_types: Vec<TriggerType>,

    /// Address the network sources bind to
    pub bind_address: String,

    pub http_port: u16,

    pub websocket_port: u16,

    /// BCM line offset of the trigger button
    pub gpio_pin: u32,

    pub gpio_chip: PathBuf,

    pub gpio_backend: GpioBackendKind,

    pub gpio_debounce_ms: u64,

    /// Key name, e.g. "space", "enter" or a single character
    pub keyboard_key: String,

    pub keyboard_raw_mode: bool,

    pub keyboard_debounce_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            default_type: TriggerType::Keyboard,
            available_types: vec![
                TriggerType::Keyboard,
                TriggerType::Gpio,
                TriggerType::Http,
                TriggerType::Websocket,
            ],
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            websocket_port: 8081,
            gpio_pin: 17,
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            gpio_backend: GpioBackendKind::Auto,
            gpio_debounce_ms: 50,
            keyboard_key: "space".to_string(),
            keyboard_raw_mode: false,
            keyboard_debounce_ms: 250,
        }
    }
}

/// Frame buffer budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_size_mb: u64,

    /// JPEG quality, 1-100
    pub compression_quality: u8,
}

impl BufferConfig {
    pub fn max_bytes(&self) -> usize {
        (self.max_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 1024,
            compression_quality: 90,
        }
    }
}

/// Complete recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub trigger: TriggerConfig,
    pub buffer: BufferConfig,
}

impl Config {
    /// Load a configuration file, falling back to defaults for anything it omits.
    ///
    /// A missing file yields the defaults; a file that exists but cannot be
    /// parsed is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write the effective configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Look up a single value by section and key
    pub fn get<T: DeserializeOwned>(&self, section: &str, key: &str) -> Result<T, ConfigError> {
        let root = serde_json::to_value(self)?;
        let value = root
            .get(section)
            .and_then(|s| s.get(key))
            .ok_or_else(|| ConfigError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        if cam.fps == 0 || cam.frame_width == 0 || cam.frame_height == 0 {
            return Err(ConfigError::Invalid(
                "camera resolution and fps must be non-zero".to_string(),
            ));
        }

        let buf = &self.buffer;
        if !(1..=100).contains(&buf.compression_quality) {
            return Err(ConfigError::Invalid(format!(
                "compression_quality must be 1-100, got {}",
                buf.compression_quality
            )));
        }
        if buf.max_size_mb == 0 {
            return Err(ConfigError::Invalid("max_size_mb must be non-zero".to_string()));
        }

        let rec = &self.recording;
        if rec.min_time > rec.max_time {
            return Err(ConfigError::Invalid(format!(
                "min_time {} exceeds max_time {}",
                rec.min_time, rec.max_time
            )));
        }
        for (name, value) in [
            ("default_before_time", rec.default_before_time),
            ("default_after_time", rec.default_after_time),
        ] {
            if !(rec.min_time..=rec.max_time).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} {value} outside {}..={}",
                    rec.min_time, rec.max_time
                )));
            }
        }

        let trig = &self.trigger;
        if trig.available_types.is_empty() {
            return Err(ConfigError::Invalid(
                "available_types must not be empty".to_string(),
            ));
        }
        if !trig.available_types.contains(&trig.default_type) {
            return Err(ConfigError::Invalid(format!(
                "default trigger type '{}' is not in available_types",
                trig.default_type
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.trigger.http_port, 8080);
        assert_eq!(config.buffer.max_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"trigger": {"default_type": "http", "http_port": 9000}, "buffer": {"compression_quality": 70}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.trigger.default_type, TriggerType::Http);
        assert_eq!(config.trigger.http_port, 9000);
        assert_eq!(config.trigger.websocket_port, 8081);
        assert_eq!(config.buffer.compression_quality, 70);
        assert_eq!(config.buffer.max_size_mb, 1024);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.recording.default_before_time = 10;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_typed_lookup() {
        let config = Config::default();
        let port: u16 = config.get("trigger", "http_port").unwrap();
        assert_eq!(port, 8080);
        let kind: TriggerType = config.get("trigger", "default_type").unwrap();
        assert_eq!(kind, TriggerType::Keyboard);

        let err = config.get::<u32>("trigger", "no_such_key").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn test_validate_rejects_default_type_outside_allow_list() {
        let mut config = Config::default();
        config.trigger.available_types = vec![TriggerType::Http];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let mut config = Config::default();
        config.buffer.compression_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_trigger_name_fails_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"trigger": {"default_type": "pigeon"}}"#).unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Json(_))));
    }
}
