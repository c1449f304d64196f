use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::common::error::{ClockFaceError, Result};
use crate::common::paths::system_config_file;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_request_timeout() -> u64 { 10_000 }

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_jpeg_quality() -> u8 { 70 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_jpeg_quality(),
            warmup_frames: 0,
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_enrollment_interval")]
    pub sample_interval_ms: u64,
}

fn default_enrollment_interval() -> u64 { 200 }

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self { sample_interval_ms: default_enrollment_interval() }
    }
}

impl EnrollmentConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    #[serde(default = "default_recognition_interval")]
    pub sample_interval_ms: u64,
    /// Consecutive failed ticks before the kiosk raises a stronger warning.
    /// Unset means never escalate.
    #[serde(default)]
    pub error_escalation_threshold: Option<u32>,
}

fn default_recognition_interval() -> u64 { 1000 }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_recognition_interval(),
            error_escalation_threshold: None,
        }
    }
}

impl RecognitionConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Config {
    /// Load from an explicit path, or from the system config file if one
    /// exists, falling back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let system_path = system_config_file();
        if system_path.exists() {
            Self::load_from_path(&system_path)
        } else {
            tracing::debug!("No config at {}, using defaults", system_path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ClockFaceError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ClockFaceError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ClockFaceError::Config("Backend base_url must not be empty".into()));
        }
        if self.backend.request_timeout_ms == 0 {
            return Err(ClockFaceError::Config("Backend request timeout must be positive".into()));
        }

        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(ClockFaceError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(ClockFaceError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(ClockFaceError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}", self.camera.jpeg_quality
            )));
        }

        if self.enrollment.sample_interval_ms == 0 {
            return Err(ClockFaceError::Config("Enrollment sample interval must be positive".into()));
        }
        if self.recognition.sample_interval_ms == 0 {
            return Err(ClockFaceError::Config("Recognition sample interval must be positive".into()));
        }
        if self.recognition.error_escalation_threshold == Some(0) {
            return Err(ClockFaceError::Config(
                "Error escalation threshold must be at least 1 when set".into()
            ));
        }

        Ok(())
    }
}
