//! Configuration management
//!
//! Settings come from an optional JSON file, then environment overrides.
//! Everything has a default, so an empty environment yields a working setup
//! rooted at `./server_data`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::{SliceLength, DEFAULT_SAMPLE_RATE};
use crate::state::ArtifactStore;

pub const CONFIG_ENV: &str = "SIGNAL_ETL_CONFIG";
pub const ROOT_ENV: &str = "SIGNAL_ETL_ROOT";
pub const DB_ENV: &str = "SIGNAL_ETL_DB";
pub const FFMPEG_ENV: &str = "SIGNAL_ETL_FFMPEG";
pub const SWEEP_ENV: &str = "SIGNAL_ETL_SWEEP_SECS";
pub const LOG_ENV: &str = "SIGNAL_ETL_LOG";
pub const SAMPLE_RATE_ENV: &str = "SIGNAL_ETL_SAMPLE_RATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Storage & tools
    pub artifact_root: PathBuf,
    /// Defaults to `signal_etl.db` next to the artifact root
    pub database_path: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,

    // Decoding
    /// Uploads are resampled to this rate; `None` keeps the native rate
    pub target_sample_rate: Option<u32>,

    // Monolithic runner
    pub frame_size: usize,
    pub hop_size: usize,
    pub slice_length: SliceLength,
    pub generate_video: bool,
    pub generate_features: bool,

    // Rendering
    pub image_width: u32,
    pub image_height: u32,

    // Housekeeping
    pub sweep_interval_secs: u64,
    pub lease_ttl_secs: i64,

    // Logging
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("server_data"),
            database_path: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            target_sample_rate: Some(DEFAULT_SAMPLE_RATE),
            frame_size: 22050,
            hop_size: 2205,
            slice_length: SliceLength::Thirty,
            generate_video: true,
            generate_features: true,
            image_width: 640,
            image_height: 480,
            sweep_interval_secs: 4 * 60 * 60,
            lease_ttl_secs: 15 * 60,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// `$SIGNAL_ETL_CONFIG`, else the per-user config directory
    pub fn default_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .map(|dir| dir.join("signal-etl").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("signal-etl.json")),
        }
    }

    /// File, then environment, then validation
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::load(&Self::default_path())?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(root) = lookup(ROOT_ENV) {
            self.artifact_root = PathBuf::from(root);
        }
        if let Some(db) = lookup(DB_ENV) {
            self.database_path = Some(PathBuf::from(db));
        }
        if let Some(ffmpeg) = lookup(FFMPEG_ENV) {
            self.ffmpeg_path = PathBuf::from(ffmpeg);
        }
        if let Some(secs) = lookup(SWEEP_ENV) {
            self.sweep_interval_secs = secs.trim().parse().map_err(|_| ConfigError::Env {
                var: SWEEP_ENV,
                value: secs.clone(),
            })?;
        }
        if let Some(rate) = lookup(SAMPLE_RATE_ENV) {
            self.target_sample_rate = match rate.trim() {
                "native" => None,
                value => Some(value.parse().map_err(|_| ConfigError::Env {
                    var: SAMPLE_RATE_ENV,
                    value: rate.clone(),
                })?),
            };
        }
        if let Some(filter) = lookup(LOG_ENV) {
            self.log_filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.frame_size == 0 {
            return Err(ConfigError::Invalid("frame_size must be positive".into()));
        }
        if self.target_sample_rate == Some(0) {
            return Err(ConfigError::Invalid(
                "target_sample_rate must be positive".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.lease_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("lease_ttl_secs must be positive".into()));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::Invalid("image size must be positive".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => self
                .artifact_root
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("signal_etl.db"),
        }
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs)
    }

    /// Artifact layout plus the database directory
    pub fn ensure_directories(&self) -> ConfigResult<()> {
        ArtifactStore::new(&self.artifact_root)
            .ensure_layout()
            .map_err(|e| ConfigError::Invalid(format!("cannot create artifact layout: {}", e)))?;
        if let Some(parent) = self.database_path().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
