//! Video Batch Engine - Core Library
//!
//! This library provides concurrent batch downloading built on external
//! media tools: task scheduling, playlist expansion, postprocessing and
//! an ordered progress stream for a presentation layer.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::AppConfig,
    models::{
        AppError, AppResult, BatchEvent, BatchRejection, EngineConfig, MediaFormat, ProbeMetadata,
        ProgressEvent, TaskDescriptor, TaskState,
    },
    scheduler::{BatchRequest, BatchSession, DownloadEngine, MAX_CONCURRENCY},
};

/// Build an engine from the persisted configuration, falling back to
/// defaults when the file is missing or invalid
pub fn bootstrap() -> (AppConfig, DownloadEngine) {
    let config = load_or_initialize_config();
    let engine = DownloadEngine::new(config.engine_config());
    (config, engine)
}

fn load_or_initialize_config() -> AppConfig {
    let loaded = AppConfig::load().and_then(|cfg| {
        cfg.validate()?;
        Ok(cfg)
    });
    match loaded {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!("Configuration unusable ({}); falling back to defaults", err);
            let defaults = AppConfig::default();
            if let Err(save_err) = defaults.save() {
                tracing::warn!("Failed to persist default configuration: {}", save_err);
            }
            defaults
        }
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing();
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
