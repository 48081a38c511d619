//! ffmpeg encoding adapter
//!
//! Post-processing only: audio conversion into the mp3 container and
//! subtitle embedding into the mp4 container. Retrieval already happened;
//! any failure here still fails the task, since the user-visible
//! deliverable is the processed file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::models::{AppError, AppResult};

/// Seam between the task pipeline and the encoding tool
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Convert the downloaded audio file into an mp3 at `output`,
    /// removing the intermediate input on success
    async fn extract_audio(
        &self,
        input: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> AppResult<()>;

    /// Embed a retrieved subtitle track into the video container,
    /// replacing the file in place; the .srt stays alongside it
    async fn embed_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        cancel: CancellationToken,
    ) -> AppResult<()>;

    /// Tool presence check; returns the reported version line
    async fn verify_available(&self) -> AppResult<String>;
}

/// The real adapter, spawning the ffmpeg binary
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Run one ffmpeg invocation to completion, observing the
    /// cancellation token before spawning and while the process runs.
    async fn run(&self, args: &[String], cancel: &CancellationToken, what: &str) -> AppResult<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::from_spawn("ffmpeg", &self.binary, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::System("encoder child stderr unavailable".into()))?;

        let collector = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tail.push(line);
                if tail.len() > 30 {
                    tail.remove(0);
                }
            }
            tail
        });

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(AppError::Io)?;
                let tail = collector.await.unwrap_or_default();
                if status.success() {
                    Ok(())
                } else {
                    let detail: String = tail.join(" | ").chars().take(300).collect();
                    Err(AppError::Postprocessing(format!("{}: {}", what, detail)))
                }
            }
            _ = cancel.cancelled() => {
                warn!("Cancelling encoder process ({})", what);
                let _ = child.kill().await;
                Err(AppError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn extract_audio(
        &self,
        input: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        info!(
            "Converting to mp3: {} -> {}",
            input.display(),
            output.display()
        );

        let args = audio_args(input, output);
        self.run(&args, &cancel, "audio conversion").await?;

        if let Err(e) = std::fs::remove_file(input) {
            warn!(
                "Could not remove intermediate file {}: {}",
                input.display(),
                e
            );
        }
        Ok(())
    }

    async fn embed_subtitles(
        &self,
        video: &Path,
        subtitles: &Path,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        info!("Embedding subtitles into {}", video.display());

        let staged = staging_path(video);
        let args = subtitle_args(video, subtitles, &staged);
        self.run(&args, &cancel, "subtitle embedding").await?;

        std::fs::rename(&staged, video).map_err(|e| {
            AppError::Postprocessing(format!(
                "could not replace {} with the subtitled copy: {}",
                video.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn verify_available(&self) -> AppResult<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::from_spawn("ffmpeg", &self.binary, e))?;

        if !output.status.success() {
            return Err(AppError::DependencyMissing {
                tool: "ffmpeg".to_string(),
                hint: format!(
                    "'{} -version' exited with {}",
                    self.binary.display(),
                    output.status
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("ffmpeg").trim().to_string())
    }
}

fn audio_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-acodec".into(),
        "libmp3lame".into(),
        "-q:a".into(),
        "0".into(),
        output.to_string_lossy().into_owned(),
    ]
}

fn subtitle_args(video: &Path, subtitles: &Path, staged: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        subtitles.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-map".into(),
        "1:0".into(),
        "-c".into(),
        "copy".into(),
        "-c:s".into(),
        "mov_text".into(),
        "-metadata:s:s:0".into(),
        "language=eng".into(),
        staged.to_string_lossy().into_owned(),
    ]
}

/// Sibling path the subtitled copy is written to before the rename
fn staging_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = video
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("mp4");
    video.with_file_name(format!("{}.embed.{}", stem, ext))
}
