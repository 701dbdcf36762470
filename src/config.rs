use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::DEFAULT_GAMMA;
use crate::ingest::SourceConfig;
use crate::storage::DEFAULT_INVENTORY_PATH;
use crate::track::{TrackerConfig, DEFAULT_MIN_SEEN_COUNT};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video2";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_STALE_SECS: f64 = 3.0;
const DEFAULT_TRACKING_HZ: u32 = 20;

#[derive(Debug, Deserialize, Default)]
struct ShelfscanConfigFile {
    inventory_path: Option<PathBuf>,
    cross_process_lock: Option<bool>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    tracking: Option<TrackingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    gamma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    backend: Option<String>,
    min_seen_count: Option<u64>,
    stale_secs: Option<f64>,
    target_hz: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ShelfscanConfig {
    pub inventory_path: PathBuf,
    /// Take an advisory file lock around every inventory operation. Only needed
    /// when several processes share the inventory document.
    pub cross_process_lock: bool,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub tracking: TrackingSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub gamma: f32,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub backend: String,
    pub min_seen_count: u64,
    pub stale_secs: f64,
    pub target_hz: u32,
}

impl Default for ShelfscanConfig {
    fn default() -> Self {
        Self::from_file(ShelfscanConfigFile::default())
    }
}

impl ShelfscanConfig {
    /// Load from the file named by `SHELFSCAN_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHELFSCAN_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ShelfscanConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        Self {
            inventory_path: file
                .inventory_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INVENTORY_PATH)),
            cross_process_lock: file.cross_process_lock.unwrap_or(false),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                gamma: camera.gamma.unwrap_or(DEFAULT_GAMMA),
            },
            tracking: TrackingSettings {
                backend: tracking
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                min_seen_count: tracking.min_seen_count.unwrap_or(DEFAULT_MIN_SEEN_COUNT),
                stale_secs: tracking.stale_secs.unwrap_or(DEFAULT_STALE_SECS),
                target_hz: tracking.target_hz.unwrap_or(DEFAULT_TRACKING_HZ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SHELFSCAN_INVENTORY_PATH") {
            if !path.trim().is_empty() {
                self.inventory_path = PathBuf::from(path);
            }
        }
        if let Ok(addr) = std::env::var("SHELFSCAN_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(device) = std::env::var("SHELFSCAN_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(backend) = std::env::var("SHELFSCAN_BACKEND") {
            if !backend.trim().is_empty() {
                self.tracking.backend = backend.trim().to_string();
            }
        }
        if let Ok(count) = std::env::var("SHELFSCAN_MIN_SEEN_COUNT") {
            self.tracking.min_seen_count = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHELFSCAN_MIN_SEEN_COUNT must be a positive integer"))?;
        }
        if let Ok(secs) = std::env::var("SHELFSCAN_STALE_SECS") {
            self.tracking.stale_secs = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHELFSCAN_STALE_SECS must be a number of seconds"))?;
        }
        if let Ok(flag) = std::env::var("SHELFSCAN_CROSS_PROCESS_LOCK") {
            self.cross_process_lock = parse_flag(&flag).ok_or_else(|| {
                anyhow!("SHELFSCAN_CROSS_PROCESS_LOCK must be one of 1/0/true/false")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.inventory_path.as_os_str().is_empty() {
            return Err(anyhow!("inventory_path must not be empty"));
        }
        if self.tracking.min_seen_count == 0 {
            return Err(anyhow!("tracking.min_seen_count must be at least 1"));
        }
        if !self.tracking.stale_secs.is_finite() || self.tracking.stale_secs <= 0.0 {
            return Err(anyhow!("tracking.stale_secs must be greater than zero"));
        }
        if self.tracking.target_hz == 0 {
            return Err(anyhow!("tracking.target_hz must be at least 1"));
        }
        if !self.camera.gamma.is_finite() || self.camera.gamma <= 0.0 {
            return Err(anyhow!("camera.gamma must be greater than zero"));
        }
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            device: self.camera.device.clone(),
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
            gamma: Some(self.camera.gamma),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            stale_age: Duration::from_secs_f64(self.tracking.stale_secs),
            ..TrackerConfig::default()
        }
        .with_rate_hz(self.tracking.target_hz)
    }
}

fn read_config_file(path: &Path) -> Result<ShelfscanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ShelfscanConfig::from_file(ShelfscanConfigFile::default());
        assert_eq!(cfg.inventory_path, PathBuf::from("data/inventory_db.json"));
        assert!(!cfg.cross_process_lock);
        assert_eq!(cfg.api_addr, "127.0.0.1:8000");
        assert_eq!(cfg.camera.device, "/dev/video2");
        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
        assert_eq!(cfg.tracking.backend, "stub");
        assert_eq!(cfg.tracking.min_seen_count, 5);
        assert!(cfg.validate().is_ok());

        let tracker = cfg.tracker_config();
        assert_eq!(tracker.stale_age, Duration::from_secs(3));
        assert_eq!(tracker.target_interval, Duration::from_millis(50));
    }

    #[test]
    fn validate_rejects_degenerate_tracking_settings() {
        let mut cfg = ShelfscanConfig::from_file(ShelfscanConfigFile::default());
        cfg.tracking.min_seen_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ShelfscanConfig::from_file(ShelfscanConfigFile::default());
        cfg.tracking.stale_secs = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ShelfscanConfig::from_file(ShelfscanConfigFile::default());
        cfg.camera.gamma = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
