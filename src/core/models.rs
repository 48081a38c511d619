//! Core data models for the batch download engine

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Requested output format for a task. Video variants select a maximum
/// resolution; Mp3Best extracts the best available audio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum MediaFormat {
    Mp4_2160p,
    #[default]
    Mp4_1080p,
    Mp4_720p,
    Mp3Best,
}

impl MediaFormat {
    /// The label shown in the format picker
    pub fn label(&self) -> &'static str {
        match self {
            MediaFormat::Mp4_2160p => "MP4 - 2160p",
            MediaFormat::Mp4_1080p => "MP4 - 1080p",
            MediaFormat::Mp4_720p => "MP4 - 720p",
            MediaFormat::Mp3Best => "MP3 - best",
        }
    }

    /// Parse a picker label or a compact spelling like "mp4-720p" / "720p" / "mp3"
    pub fn parse(input: &str) -> Option<MediaFormat> {
        let normalized: String = input
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        match normalized.as_str() {
            "mp4-2160p" | "mp4_2160p" | "2160p" | "4k" => Some(MediaFormat::Mp4_2160p),
            "mp4-1080p" | "mp4_1080p" | "1080p" => Some(MediaFormat::Mp4_1080p),
            "mp4-720p" | "mp4_720p" | "720p" => Some(MediaFormat::Mp4_720p),
            "mp3-best" | "mp3_best" | "mp3" => Some(MediaFormat::Mp3Best),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        !matches!(self, MediaFormat::Mp3Best)
    }

    /// Maximum video height for the format selector; None for audio-only
    pub fn max_height(&self) -> Option<u32> {
        match self {
            MediaFormat::Mp4_2160p => Some(2160),
            MediaFormat::Mp4_1080p => Some(1080),
            MediaFormat::Mp4_720p => Some(720),
            MediaFormat::Mp3Best => None,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable description of one download request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub url: String,
    pub requested_format: MediaFormat,
    pub destination_dir: PathBuf,
    /// Some(true) when the URL is known (probe) or suspected (URL shape)
    /// to be a playlist; None when nothing is known
    pub playlist_hint: Option<bool>,
    /// Set on tasks materialized from a playlist entry
    pub parent_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TaskDescriptor {
    pub fn new(url: impl Into<String>, format: MediaFormat, destination_dir: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            requested_format: format,
            destination_dir,
            playlist_hint: None,
            parent_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_playlist_hint(mut self, hint: Option<bool>) -> Self {
        self.playlist_hint = hint;
        self
    }

    /// Build a descriptor for one playlist entry. Children inherit the
    /// parent's format and land in the playlist subfolder; they are never
    /// expanded again themselves.
    pub fn child_of(parent: &TaskDescriptor, url: impl Into<String>, subfolder: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            requested_format: parent.requested_format,
            destination_dir: subfolder,
            playlist_hint: Some(false),
            parent_id: Some(parent.id.clone()),
            created_at: chrono::Utc::now(),
        }
    }

    /// Whether execution should expand this task into per-entry children
    pub fn wants_expansion(&self) -> bool {
        self.playlist_hint == Some(true) && self.parent_id.is_none()
    }
}

/// Task lifecycle tag. Transitions are monotonic:
/// Queued → Downloading → (Postprocessing) → {Done, Failed}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", content = "detail")]
pub enum TaskState {
    Queued,
    Downloading,
    Postprocessing,
    Done,
    Failed { reason: String },
}

impl TaskState {
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskState::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed { .. })
    }

    /// Legal next states under the monotonic lifecycle
    pub fn can_advance_to(&self, next: &TaskState) -> bool {
        match (self, next) {
            (TaskState::Queued, TaskState::Downloading) => true,
            // a task picked up right as cancel lands fails without starting
            (TaskState::Queued, TaskState::Failed { .. }) => true,
            (TaskState::Downloading, TaskState::Postprocessing) => true,
            (TaskState::Downloading, TaskState::Done) => true,
            (TaskState::Downloading, TaskState::Failed { .. }) => true,
            (TaskState::Postprocessing, TaskState::Done) => true,
            (TaskState::Postprocessing, TaskState::Failed { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => f.write_str("queued"),
            TaskState::Downloading => f.write_str("downloading"),
            TaskState::Postprocessing => f.write_str("postprocessing"),
            TaskState::Done => f.write_str("done"),
            TaskState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// One progress report from a worker. Produced into the task's bounded
/// channel, consumed once by the aggregator, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub task_id: String,
    pub new_state: TaskState,
    /// Completion percentage 0-100 when the tool reported one
    pub numeric_progress: Option<f64>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn transition(task_id: impl Into<String>, new_state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            new_state,
            numeric_progress: None,
            message: None,
        }
    }

    pub fn transition_with_message(
        task_id: impl Into<String>,
        new_state: TaskState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            new_state,
            numeric_progress: None,
            message: Some(message.into()),
        }
    }

    pub fn percent(task_id: impl Into<String>, state: TaskState, percent: f64) -> Self {
        Self {
            task_id: task_id.into(),
            new_state: state,
            numeric_progress: Some(percent),
            message: None,
        }
    }

    /// Rapid numeric updates may replace one another in the bridge buffer;
    /// state transitions (terminal ones above all) may not.
    pub fn is_coalescable(&self) -> bool {
        self.numeric_progress.is_some() && !self.new_state.is_terminal()
    }
}

/// UI-facing stream item: per-task progress, or the end-of-batch marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum BatchEvent {
    Task(ProgressEvent),
    BatchComplete {
        done_count: usize,
        failed_count: usize,
    },
}

/// Per-entry validation failure, reported at submission without blocking
/// the valid entries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRejection {
    /// Index of the offending line in the submitted input
    pub index: usize,
    pub input: String,
    pub reason: String,
}

/// One native format advertised by the extraction tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativeFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
}

/// Metadata returned by a probe, cached per engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeMetadata {
    pub url: String,
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub filesize_bytes: Option<u64>,
    pub is_playlist: bool,
    pub entry_count: Option<usize>,
    pub platform: String,
    pub formats: Vec<NativeFormat>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl ProbeMetadata {
    /// Equality up to the freshness timestamp; repeated probes of one URL
    /// must agree on everything else
    pub fn same_content(&self, other: &ProbeMetadata) -> bool {
        self.url == other.url
            && self.title == other.title
            && self.duration_seconds == other.duration_seconds
            && self.filesize_bytes == other.filesize_bytes
            && self.is_playlist == other.is_playlist
            && self.entry_count == other.entry_count
            && self.platform == other.platform
            && self.formats == other.formats
    }
}

/// Flat playlist listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistInfo {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration: Option<f64>,
}

/// What a successful download produced on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadArtifact {
    pub media_path: PathBuf,
    pub subtitle_path: Option<PathBuf>,
}

/// Runtime knobs for the engine; built from the persisted AppConfig
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Minimum spacing between consecutive probes (rate-limiting policy)
    pub probe_min_interval: Duration,
    pub probe_timeout: Duration,
    /// Capacity of each task's bounded progress channel
    pub task_event_buffer: usize,
    /// Capacity of the UI-facing event channel
    pub ui_event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            probe_min_interval: Duration::from_millis(1000),
            probe_timeout: Duration::from_secs(40),
            task_event_buffer: 64,
            ui_event_buffer: 256,
        }
    }
}

/// Bounded per-task progress channel endpoints
pub type TaskEventSender = mpsc::Sender<ProgressEvent>;
pub type TaskEventReceiver = mpsc::Receiver<ProgressEvent>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("private or login-restricted content: {0}")]
    PrivateContent(String),

    #[error("postprocessing failed: {0}")]
    Postprocessing(String),

    #[error("missing dependency: {tool} ({hint})")]
    DependencyMissing { tool: String, hint: String },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("system error: {0}")]
    System(String),
}

impl AppError {
    /// Classify a process spawn failure: a missing binary is a
    /// dependency problem, anything else stays an IO error
    pub fn from_spawn(tool: &str, binary: &std::path::Path, err: std::io::Error) -> AppError {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::DependencyMissing {
                tool: tool.to_string(),
                hint: format!(
                    "'{}' was not found; install it and make sure it is on PATH",
                    binary.display()
                ),
            }
        } else {
            AppError::Io(err)
        }
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
