//! yt-dlp extraction adapter
//!
//! Wraps the external yt-dlp binary behind the `MediaExtractor` seam:
//! metadata probes, flat playlist listings, and full downloads with the
//! tool's heterogeneous output normalized into `ProgressEvent`s.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::models::{
    AppError, AppResult, DownloadArtifact, NativeFormat, PlaylistEntry, PlaylistInfo,
    ProbeMetadata, ProgressEvent, TaskDescriptor, TaskEventSender, TaskState,
};
use crate::utils::file_utils::ensure_dir_exists;
use crate::utils::validation::detect_platform;

/// Subdirectory of the destination where raw tool output is kept
const TOOL_LOG_DIR: &str = "yt-dlp-logs";

/// Seam between the scheduler and the extraction tool. The scheduler only
/// ever talks to this trait; tests drive it with a scripted fake.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Metadata-only fetch. The adapter spaces consecutive probes out.
    async fn probe(&self, url: &str) -> AppResult<ProbeMetadata>;

    /// Flat listing of a playlist's entries, without downloading anything.
    /// A cancelled token kills the listing process like a download.
    async fn list_playlist(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> AppResult<PlaylistInfo>;

    /// Full retrieval for the task's format. Numeric progress is pushed
    /// into `events`; the returned artifact names what landed on disk.
    async fn download(
        &self,
        task: &TaskDescriptor,
        events: TaskEventSender,
        cancel: CancellationToken,
    ) -> AppResult<DownloadArtifact>;

    /// Tool presence check; returns the reported version
    async fn verify_available(&self) -> AppResult<String>;
}

/// The real adapter, invoking the yt-dlp binary through tokio processes
pub struct YtDlpExtractor {
    binary: PathBuf,
    probe_timeout: Duration,
    probe_min_interval: Duration,
    /// Next free probe slot; probes reserve slots so that even concurrent
    /// callers end up spaced `probe_min_interval` apart
    next_probe_slot: Mutex<Option<Instant>>,
}

impl YtDlpExtractor {
    pub fn new(binary: PathBuf, probe_timeout: Duration, probe_min_interval: Duration) -> Self {
        Self {
            binary,
            probe_timeout,
            probe_min_interval,
            next_probe_slot: Mutex::new(None),
        }
    }

    /// Deliberate rate limiting: probing many URLs in quick succession
    /// must not hammer the remote service.
    async fn throttle_probe(&self) {
        let wait = {
            let mut slot = self.next_probe_slot.lock();
            let now = Instant::now();
            let mine = match *slot {
                Some(prev) => std::cmp::max(now, prev + self.probe_min_interval),
                None => now,
            };
            *slot = Some(mine);
            mine.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Probe throttled for {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    fn write_tool_log(&self, task: &TaskDescriptor, lines: &[String]) {
        let log_dir = task.destination_dir.join(TOOL_LOG_DIR);
        if let Err(e) = ensure_dir_exists(&log_dir) {
            warn!("Cannot create tool log directory: {}", e);
            return;
        }

        let path = log_dir.join(format!("{}.log", task.id));
        if let Err(e) = std::fs::write(&path, lines.join("\n")) {
            warn!("Failed to write tool log {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn probe(&self, url: &str) -> AppResult<ProbeMetadata> {
        self.throttle_probe().await;
        debug!("Probing metadata: {}", url);

        let result = tokio::time::timeout(
            self.probe_timeout,
            Command::new(&self.binary)
                .args([
                    "--dump-single-json",
                    "--flat-playlist",
                    "--skip-download",
                    "--no-warnings",
                    url,
                ])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(spawned) => spawned.map_err(|e| AppError::from_spawn("yt-dlp", &self.binary, e))?,
            Err(_) => {
                return Err(AppError::Network(format!(
                    "metadata probe timed out after {}s: {}",
                    self.probe_timeout.as_secs(),
                    url
                )))
            }
        };

        if !output.status.success() {
            return Err(translate_ytdlp_error(
                &String::from_utf8_lossy(&output.stderr),
                url,
            ));
        }

        let raw: RawProbe = serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::Parse(format!("unexpected probe output for {}: {}", url, e)))?;
        Ok(raw.into_metadata(url))
    }

    async fn list_playlist(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> AppResult<PlaylistInfo> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        info!("Listing playlist entries: {}", url);

        let mut child = Command::new(&self.binary)
            .args(["--flat-playlist", "--dump-json", "--no-warnings", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::from_spawn("yt-dlp", &self.binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::System("extraction child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::System("extraction child stderr unavailable".into()))?;
        let stderr_task = drain_stderr(stderr);

        let mut out_lines = BufReader::new(stdout).lines();
        let mut listing = String::new();

        loop {
            tokio::select! {
                line = out_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        listing.push_str(&line);
                        listing.push('\n');
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading playlist listing for {}: {}", url, e);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    warn!("Cancelling playlist listing: killing extraction process for {}", url);
                    let _ = child.kill().await;
                    return Err(AppError::Cancelled);
                }
            }
        }

        let status = child.wait().await.map_err(AppError::Io)?;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(translate_ytdlp_error(&stderr_lines.join("\n"), url));
        }

        parse_flat_playlist(&listing, url)
    }

    async fn download(
        &self,
        task: &TaskDescriptor,
        events: TaskEventSender,
        cancel: CancellationToken,
    ) -> AppResult<DownloadArtifact> {
        // checkpoint: never start a process for an already-cancelled session
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        ensure_dir_exists(&task.destination_dir)
            .map_err(|e| AppError::System(e.to_string()))?;

        let args = download_args(task);
        debug!("Starting yt-dlp for task {}: {:?}", task.id, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::from_spawn("yt-dlp", &self.binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::System("extraction child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::System("extraction child stderr unavailable".into()))?;

        let stderr_task = drain_stderr(stderr);

        let mut out_lines = BufReader::new(stdout).lines();
        let mut log: Vec<String> = Vec::new();
        let mut media_path: Option<PathBuf> = None;
        let mut subtitle_path: Option<PathBuf> = None;

        loop {
            tokio::select! {
                line = out_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        log.push(line.clone());
                        if let Some(percent) = parse_progress_line(&line) {
                            // full channel drops intermediate values only;
                            // transitions go through the worker with backpressure
                            let _ = events.try_send(ProgressEvent::percent(
                                &task.id,
                                TaskState::Downloading,
                                percent,
                            ));
                        } else if let Some(path) = parse_destination_line(&line) {
                            media_path = Some(path);
                        } else if let Some(path) = parse_subtitle_line(&line) {
                            subtitle_path = Some(path);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading tool output for task {}: {}", task.id, e);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    warn!("Cancelling task {}: killing extraction process", task.id);
                    let _ = child.kill().await;
                    cleanup_part_files(&task.destination_dir);
                    self.write_tool_log(task, &log);
                    return Err(AppError::Cancelled);
                }
            }
        }

        let status = child.wait().await.map_err(AppError::Io)?;
        let stderr_lines = stderr_task.await.unwrap_or_default();
        log.extend(stderr_lines.iter().cloned());
        self.write_tool_log(task, &log);

        if !status.success() {
            return Err(translate_ytdlp_error(&stderr_lines.join("\n"), &task.url));
        }

        let media_path = media_path.ok_or_else(|| {
            AppError::Extraction(format!(
                "tool reported success but no destination was seen for {}",
                task.url
            ))
        })?;

        Ok(DownloadArtifact {
            media_path,
            subtitle_path,
        })
    }

    async fn verify_available(&self) -> AppResult<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::from_spawn("yt-dlp", &self.binary, e))?;

        if !output.status.success() {
            return Err(AppError::DependencyMissing {
                tool: "yt-dlp".to_string(),
                hint: format!(
                    "'{} --version' exited with {}",
                    self.binary.display(),
                    output.status
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Drain a child's stderr on its own task, keeping the last 200 lines;
/// a chatty tool cannot deadlock on a full pipe while stdout is parsed
fn drain_stderr(stderr: tokio::process::ChildStderr) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
            if collected.len() > 200 {
                collected.remove(0);
            }
        }
        collected
    })
}

/// Build the full argument list for a download invocation
fn download_args(task: &TaskDescriptor) -> Vec<String> {
    let output_template = task.destination_dir.join("%(title)s.%(ext)s");

    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--progress-template".into(),
        "download:%(progress._percent_str)s".into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--retries".into(),
        "3".into(),
        "--fragment-retries".into(),
        "3".into(),
        "-o".into(),
        output_template.to_string_lossy().into_owned(),
    ];

    match task.requested_format.max_height() {
        Some(height) => {
            args.push("-f".into());
            args.push(format!(
                "bestvideo[ext=mp4][height<={h}]+bestaudio[ext=m4a]/best[ext=mp4][height<={h}]/best[height<={h}]/best",
                h = height
            ));
            args.extend(
                [
                    "--merge-output-format",
                    "mp4",
                    "--write-subs",
                    "--write-auto-subs",
                    "--sub-langs",
                    "en",
                    "--sub-format",
                    "srt",
                ]
                .map(String::from),
            );
        }
        None => {
            // audio-only: raw best audio here, conversion to mp3 is the
            // encoding adapter's job; subtitles are never requested
            args.push("-f".into());
            args.push("bestaudio/best".into());
        }
    }

    args.push(task.url.clone());
    args
}

/// Parse a `--progress-template` line like `download:  45.2%`
fn parse_progress_line(line: &str) -> Option<f64> {
    let rest = line.trim().strip_prefix("download:")?;
    let cleaned = rest.trim().trim_end_matches('%').trim();
    cleaned.parse::<f64>().ok().map(|p| p.clamp(0.0, 100.0))
}

/// Learn the produced file path from the tool's status lines
fn parse_destination_line(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("[download] Destination: ") {
        return Some(PathBuf::from(rest.trim()));
    }
    if let Some(rest) = trimmed.strip_prefix("[Merger] Merging formats into \"") {
        return Some(PathBuf::from(rest.trim_end_matches('"')));
    }
    // a file already on disk exits 0 with this line and no Destination
    if let Some(rest) = trimmed.strip_prefix("[download] ") {
        for suffix in [
            " has already been downloaded and merged",
            " has already been downloaded",
        ] {
            if let Some(path) = rest.strip_suffix(suffix) {
                return Some(PathBuf::from(path.trim()));
            }
        }
    }
    None
}

fn parse_subtitle_line(line: &str) -> Option<PathBuf> {
    let rest = line
        .trim()
        .strip_prefix("[info] Writing video subtitles to: ")?;
    Some(PathBuf::from(rest.trim()))
}

/// Map the tool's stderr onto the error taxonomy. First match wins.
fn translate_ytdlp_error(stderr: &str, url: &str) -> AppError {
    let lower = stderr.to_lowercase();

    if lower.contains("http error 429") || lower.contains("too many requests") {
        return AppError::Network(format!(
            "rate limited by the remote service (HTTP 429): {}",
            url
        ));
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return AppError::Network(format!("connection timed out: {}", url));
    }
    if lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("name or service not known")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("network is unreachable")
    {
        return AppError::Network(format!("network failure: {}", url));
    }
    if lower.contains("unsupported url") {
        return AppError::UnsupportedUrl(url.to_string());
    }
    if lower.contains("private video")
        || lower.contains("sign in")
        || lower.contains("login required")
        || lower.contains("members-only")
        || lower.contains("http error 403")
        || lower.contains("forbidden")
    {
        return AppError::PrivateContent(format!("authentication required: {}", url));
    }

    // fall back to the tool's own last ERROR: line when there is one
    let reason = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR:"))
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| {
            let excerpt: String = stderr.chars().take(300).collect();
            if excerpt.trim().is_empty() {
                "tool exited with an error".to_string()
            } else {
                excerpt
            }
        });
    AppError::Extraction(reason)
}

/// Remove leftover partial downloads after a kill
fn cleanup_part_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove partial file {}: {}", path.display(), e);
            }
        }
    }
}

/// One line of `--flat-playlist --dump-json` output per entry
fn parse_flat_playlist(stdout: &str, url: &str) -> AppResult<PlaylistInfo> {
    let mut title: Option<String> = None;
    let mut entries = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };

        if title.is_none() {
            title = value
                .get("playlist_title")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| {
                    value
                        .get("playlist")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });
        }

        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let entry_url = value
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                value
                    .get("webpage_url")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));

        if id.is_empty() && entry_url.ends_with('=') {
            continue;
        }

        entries.push(PlaylistEntry {
            id,
            title: value
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown title")
                .to_string(),
            url: entry_url,
            duration: value.get("duration").and_then(|v| v.as_f64()),
        });
    }

    if entries.is_empty() {
        return Err(AppError::Extraction(format!(
            "playlist has no listable entries: {}",
            url
        )));
    }

    Ok(PlaylistInfo {
        title: title.unwrap_or_else(|| "playlist".to_string()),
        entries,
    })
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    playlist_count: Option<usize>,
    entries: Option<Vec<serde_json::Value>>,
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    height: Option<u32>,
}

impl RawProbe {
    fn into_metadata(self, url: &str) -> ProbeMetadata {
        let is_playlist = self.kind.as_deref() == Some("playlist");
        let entry_count = if is_playlist {
            self.playlist_count
                .or_else(|| self.entries.as_ref().map(|e| e.len()))
        } else {
            None
        };

        ProbeMetadata {
            url: url.to_string(),
            title: self.title.unwrap_or_else(|| "Unknown title".to_string()),
            duration_seconds: self.duration,
            filesize_bytes: self
                .filesize
                .or(self.filesize_approx)
                .map(|bytes| bytes.max(0.0) as u64),
            is_playlist,
            entry_count,
            platform: detect_platform(url),
            formats: self
                .formats
                .unwrap_or_default()
                .into_iter()
                .filter_map(|f| {
                    f.format_id.map(|format_id| NativeFormat {
                        format_id,
                        ext: f.ext,
                        height: f.height,
                    })
                })
                .collect(),
            fetched_at: chrono::Utc::now(),
        }
    }
}
