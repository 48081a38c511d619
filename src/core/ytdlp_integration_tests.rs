//! Integration tests against the real external tools
//!
//! These run only with `--features integration-tests` and expect yt-dlp
//! and ffmpeg on PATH. Nothing here touches the network beyond what the
//! tools themselves do on startup.

#[cfg(all(test, feature = "integration-tests"))]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use crate::core::ffmpeg::{FfmpegEncoder, MediaEncoder};
    use crate::core::models::AppError;
    use crate::core::ytdlp::{MediaExtractor, YtDlpExtractor};

    fn real_extractor(min_interval: Duration) -> YtDlpExtractor {
        YtDlpExtractor::new(
            PathBuf::from("yt-dlp"),
            Duration::from_secs(40),
            min_interval,
        )
    }

    #[tokio::test]
    async fn test_ytdlp_reports_a_version() {
        let extractor = real_extractor(Duration::from_millis(0));
        let version = extractor
            .verify_available()
            .await
            .expect("yt-dlp should be installed for integration tests");
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_ffmpeg_reports_a_version() {
        let encoder = FfmpegEncoder::new(PathBuf::from("ffmpeg"));
        let version = encoder
            .verify_available()
            .await
            .expect("ffmpeg should be installed for integration tests");
        assert!(version.contains("ffmpeg"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_dependency_error() {
        let extractor = YtDlpExtractor::new(
            PathBuf::from("definitely-not-a-real-binary-name"),
            Duration::from_secs(5),
            Duration::from_millis(0),
        );
        let result = extractor.verify_available().await;
        assert!(matches!(
            result,
            Err(AppError::DependencyMissing { ref tool, .. }) if tool == "yt-dlp"
        ));
    }

    #[tokio::test]
    async fn test_consecutive_probes_are_spaced_out() {
        // both probes fail fast (the URL has no extractor), but the
        // second spawn must still wait for its slot
        let extractor = real_extractor(Duration::from_millis(300));
        let url = "https://localhost.invalid/nothing";

        let started = Instant::now();
        let _ = extractor.probe(url).await;
        let _ = extractor.probe(url).await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
