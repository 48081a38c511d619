//! Tracing subscriber setup

/// Initialize tracing with an env-filter. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "video_batch_engine=info".into());

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
