//! Application configuration management

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::models::{EngineConfig, MediaFormat};

/// Main application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub download: DownloadSettings,
    pub tools: ToolSettings,
    pub probe: ProbeSettings,
}

/// Download defaults, including the last destination the user picked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub destination: String,
    pub concurrency: usize,
    pub default_format: MediaFormat,
}

/// External tool locations; bare names resolve through PATH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
}

/// Metadata probe behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Minimum spacing between consecutive probes in milliseconds
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download: DownloadSettings::default(),
            tools: ToolSettings::default(),
            probe: ProbeSettings::default(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let destination = UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|d| d.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "downloads".to_string());

        Self {
            destination,
            concurrency: 3,
            default_format: MediaFormat::Mp4_1080p,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            timeout_secs: 40,
        }
    }
}

impl AppConfig {
    /// Load configuration from file, creating default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let config = Self::load_from(&config_path)?;
            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)?;
        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "videobatch", "engine")
            .with_context(|| "Failed to get project directories")?;

        let config_dir = project_dirs.config_dir();
        Ok(config_dir.join("config.json"))
    }

    /// Remember the destination folder the user last downloaded into
    pub fn remember_destination(&mut self, destination: &Path) {
        self.download.destination = destination.to_string_lossy().into_owned();
    }

    /// Build the runtime engine configuration from the persisted values
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ytdlp_path: PathBuf::from(&self.tools.ytdlp_path),
            ffmpeg_path: PathBuf::from(&self.tools.ffmpeg_path),
            probe_min_interval: Duration::from_millis(self.probe.min_interval_ms),
            probe_timeout: Duration::from_secs(self.probe.timeout_secs),
            ..EngineConfig::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.download.concurrency) {
            anyhow::bail!("Concurrency must be between 1 and 5");
        }

        if self.download.destination.trim().is_empty() {
            anyhow::bail!("Destination directory must not be empty");
        }

        if self.tools.ytdlp_path.trim().is_empty() || self.tools.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("Tool paths must not be empty");
        }

        if self.probe.min_interval_ms > 60_000 {
            anyhow::bail!("Probe interval should not exceed 60 seconds");
        }

        if self.probe.timeout_secs == 0 || self.probe.timeout_secs > 300 {
            anyhow::bail!("Probe timeout should be between 1 and 300 seconds");
        }

        Ok(())
    }
}
