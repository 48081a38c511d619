//! Core business logic module
//!
//! This module contains the domain models, the batch scheduler and the
//! external-tool adapters for the download engine.

pub mod aggregator;
pub mod batch;
pub mod config;
pub mod ffmpeg;
pub mod models;
pub mod scheduler;
pub mod ytdlp;


#[cfg(test)]
mod batch_tests;


#[cfg(test)]
mod ytdlp_integration_tests;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::{
    AppError, AppResult, BatchEvent, BatchRejection, EngineConfig, MediaFormat, ProbeMetadata,
    ProgressEvent, TaskDescriptor, TaskState,
};
pub use scheduler::{BatchRequest, BatchSession, DownloadEngine, MAX_CONCURRENCY};
