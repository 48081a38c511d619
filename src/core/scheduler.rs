//! Batch scheduling and the bounded worker pool
//!
//! `DownloadEngine` is the long-lived context object holding the
//! adapters, the probe cache and the tooling state. `submit_batch` turns
//! raw input lines into queued tasks and hands back a `BatchSession`
//! whose serialized event stream ends with the batch-complete marker.
//! A driver task owns the FIFO queue; a semaphore caps how many workers
//! run at once, and a free slot never idles while the queue is
//! non-empty.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::aggregator::ProgressAggregator;
use crate::core::batch::build_descriptors;
use crate::core::ffmpeg::{FfmpegEncoder, MediaEncoder};
use crate::core::models::{
    AppError, AppResult, BatchEvent, BatchRejection, EngineConfig, MediaFormat, ProbeMetadata,
    ProgressEvent, TaskDescriptor, TaskEventSender, TaskState,
};
use crate::core::ytdlp::{MediaExtractor, YtDlpExtractor};
use crate::utils::file_utils::{ensure_dir_writable, sanitize_filename};
use crate::utils::validation::{is_valid_media_url, sanitize_url, validate_url};

/// Hard ceiling on the worker pool size
pub const MAX_CONCURRENCY: usize = 5;

/// Everything one batch submission needs
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Raw input, one URL per line; blank lines are skipped
    pub lines: Vec<String>,
    /// Per-line format choices, keyed by input line index
    pub format_overrides: HashMap<usize, MediaFormat>,
    pub default_format: MediaFormat,
    pub destination: PathBuf,
    /// Worker pool size, clamped to 1..=MAX_CONCURRENCY
    pub concurrency: usize,
}

impl BatchRequest {
    pub fn new(lines: Vec<String>, destination: PathBuf) -> Self {
        Self {
            lines,
            format_overrides: HashMap::new(),
            default_format: MediaFormat::default(),
            destination,
            concurrency: 3,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_default_format(mut self, format: MediaFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_format_override(mut self, line_index: usize, format: MediaFormat) -> Self {
        self.format_overrides.insert(line_index, format);
        self
    }
}

/// Adapters and knobs shared by the engine, drivers and workers
struct EngineShared {
    config: EngineConfig,
    extractor: Arc<dyn MediaExtractor>,
    encoder: Arc<dyn MediaEncoder>,
}

/// The engine's public face. One instance per application session; all
/// collaborators reach the adapters through it rather than through
/// globals.
pub struct DownloadEngine {
    shared: Arc<EngineShared>,
    /// Probe results keyed by sanitized URL; repeated probes of one URL
    /// within a session reuse these instead of re-spawning the tool
    probe_cache: Mutex<HashMap<String, ProbeMetadata>>,
    deps_verified: AtomicBool,
}

impl DownloadEngine {
    pub fn new(config: EngineConfig) -> Self {
        let extractor: Arc<dyn MediaExtractor> = Arc::new(YtDlpExtractor::new(
            config.ytdlp_path.clone(),
            config.probe_timeout,
            config.probe_min_interval,
        ));
        let encoder: Arc<dyn MediaEncoder> = Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone()));
        Self::with_adapters(config, extractor, encoder)
    }

    /// Adapter injection seam; tests substitute scripted fakes here
    pub fn with_adapters(
        config: EngineConfig,
        extractor: Arc<dyn MediaExtractor>,
        encoder: Arc<dyn MediaEncoder>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                extractor,
                encoder,
            }),
            probe_cache: Mutex::new(HashMap::new()),
            deps_verified: AtomicBool::new(false),
        }
    }

    /// Check both external tools once per engine lifetime. A missing tool
    /// surfaces here, at submission, not once per task.
    async fn verify_dependencies(&self) -> AppResult<()> {
        if self.deps_verified.load(Ordering::Acquire) {
            return Ok(());
        }
        let ytdlp = self.shared.extractor.verify_available().await?;
        let ffmpeg = self.shared.encoder.verify_available().await?;
        info!("Tooling available: yt-dlp {}, ffmpeg {}", ytdlp, ffmpeg);
        self.deps_verified.store(true, Ordering::Release);
        Ok(())
    }

    /// Validate the request, queue its tasks and start the driver.
    ///
    /// Invalid lines never become tasks; they come back as rejections on
    /// the session while the valid ones proceed. An empty request still
    /// yields a session whose stream is just the batch-complete marker.
    pub async fn submit_batch(&self, request: BatchRequest) -> AppResult<BatchSession> {
        self.verify_dependencies().await?;

        let concurrency = request.concurrency.clamp(1, MAX_CONCURRENCY);
        if concurrency != request.concurrency {
            warn!(
                "Requested concurrency {} out of range, using {}",
                request.concurrency, concurrency
            );
        }

        ensure_dir_writable(&request.destination).map_err(|e| {
            AppError::Validation(format!("destination directory is not usable: {}", e))
        })?;

        let plan = build_descriptors(
            &request.lines,
            &request.format_overrides,
            request.default_format,
            &request.destination,
            |url| self.probe_cache.lock().get(url).map(|m| m.is_playlist),
        );
        for rejection in &plan.rejections {
            warn!("Rejected input line {}: {}", rejection.index, rejection.reason);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Submitting batch {}: {} task(s), concurrency {}",
            session_id,
            plan.descriptors.len(),
            concurrency
        );

        let cancel = CancellationToken::new();
        let states: Arc<DashMap<String, TaskState>> = Arc::new(DashMap::new());
        let (mut aggregator, events) = ProgressAggregator::new(self.shared.config.ui_event_buffer);
        let accepted = plan.descriptors.clone();
        let mut pending = VecDeque::new();
        for descriptor in plan.descriptors {
            enqueue(&self.shared, &mut aggregator, &mut pending, &states, descriptor).await;
        }

        let driver = tokio::spawn(run_driver(
            self.shared.clone(),
            pending,
            concurrency,
            aggregator,
            states.clone(),
            cancel.clone(),
        ));

        Ok(BatchSession {
            id: session_id,
            events,
            cancel,
            accepted,
            rejections: plan.rejections,
            states,
            driver,
        })
    }

    /// Probe a list of URLs, preserving input order in the results.
    /// Individual failures do not abort the rest of the list.
    pub async fn probe(&self, urls: &[String]) -> Vec<AppResult<ProbeMetadata>> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.probe_one(url).await);
        }
        results
    }

    /// Probe one URL, consulting the session cache first
    pub async fn probe_one(&self, url: &str) -> AppResult<ProbeMetadata> {
        let clean = sanitize_url(url.trim());
        if let Err(e) = validate_url(&clean) {
            return Err(AppError::Validation(e.to_string()));
        }
        if !is_valid_media_url(&clean) {
            return Err(AppError::Validation(format!(
                "not a valid http(s) URL: {}",
                url.trim()
            )));
        }

        if let Some(hit) = self.probe_cache.lock().get(&clean).cloned() {
            debug!("Probe cache hit for {}", clean);
            return Ok(hit);
        }

        let metadata = self.shared.extractor.probe(&clean).await?;
        self.probe_cache.lock().insert(clean, metadata.clone());
        Ok(metadata)
    }

    /// Drop every cached probe result; the next probe of any URL spawns
    /// the tool again instead of serving stale metadata
    pub fn clear_probe_cache(&self) {
        let mut cache = self.probe_cache.lock();
        debug!("Clearing {} cached probe result(s)", cache.len());
        cache.clear();
    }

    /// Cooperatively stop a session started by this engine
    pub fn cancel(&self, session: &BatchSession) {
        info!("Cancel requested for batch {}", session.id());
        session.cancel();
    }
}

/// Live handle to a submitted batch
pub struct BatchSession {
    id: String,
    events: mpsc::Receiver<BatchEvent>,
    cancel: CancellationToken,
    accepted: Vec<TaskDescriptor>,
    rejections: Vec<BatchRejection>,
    /// Current state per task, written by the owning worker right before
    /// the matching event is queued; a snapshot never lags the stream
    states: Arc<DashMap<String, TaskState>>,
    driver: JoinHandle<()>,
}

impl BatchSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event in the serialized stream; `None` once the stream has
    /// closed after the batch-complete marker
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// The descriptors this batch accepted, in input order. Playlist
    /// children materialize later and are not listed here.
    pub fn accepted_tasks(&self) -> &[TaskDescriptor] {
        &self.accepted
    }

    /// Inputs that never became tasks, with per-line reasons
    pub fn rejections(&self) -> &[BatchRejection] {
        &self.rejections
    }

    /// Snapshot of one task's current lifecycle state; `None` for ids
    /// this session has never announced
    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|entry| entry.value().clone())
    }

    /// Request cooperative shutdown: queued tasks stay queued, running
    /// workers stop at their next checkpoint
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the driver; clone it to wire cancellation to
    /// external signals
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// Drain whatever remains of the stream and wait for the driver
    pub async fn wait(mut self) -> AppResult<()> {
        while self.events.recv().await.is_some() {}
        self.driver
            .await
            .map_err(|e| AppError::System(format!("batch driver panicked: {}", e)))
    }
}

/// A task waiting for a worker slot, with its progress channel already
/// attached to the aggregator
struct QueuedTask {
    descriptor: TaskDescriptor,
    events: TaskEventSender,
}

enum WorkerMessage {
    /// A playlist parent produced per-entry children for the queue tail
    Expand { children: Vec<TaskDescriptor> },
    /// A worker retired and freed its slot
    Finished { failed: bool },
}

/// Wire up a task's progress channel and announce it as queued
async fn enqueue(
    shared: &EngineShared,
    aggregator: &mut ProgressAggregator,
    pending: &mut VecDeque<QueuedTask>,
    states: &DashMap<String, TaskState>,
    descriptor: TaskDescriptor,
) {
    let (events, receiver) = mpsc::channel(shared.config.task_event_buffer.max(1));
    aggregator.attach_task(receiver);
    announce(
        states,
        &events,
        ProgressEvent::transition(&descriptor.id, TaskState::Queued),
    )
    .await;
    pending.push_back(QueuedTask { descriptor, events });
}

async fn run_driver(
    shared: Arc<EngineShared>,
    mut pending: VecDeque<QueuedTask>,
    concurrency: usize,
    mut aggregator: ProgressAggregator,
    states: Arc<DashMap<String, TaskState>>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let mut in_flight = 0usize;
    let mut done_count = 0usize;
    let mut failed_count = 0usize;
    let mut cancelled = false;

    loop {
        // fill every free slot from the queue head
        while !cancelled && !pending.is_empty() {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(next) = pending.pop_front() else {
                break;
            };
            in_flight += 1;
            debug!(
                "Starting task {} ({} in flight)",
                next.descriptor.id, in_flight
            );
            tokio::spawn(run_worker(
                shared.clone(),
                next,
                permit,
                worker_tx.clone(),
                states.clone(),
                cancel.clone(),
            ));
        }

        if in_flight == 0 && (cancelled || pending.is_empty()) {
            break;
        }

        tokio::select! {
            message = worker_rx.recv() => {
                match message {
                    Some(WorkerMessage::Finished { failed }) => {
                        in_flight -= 1;
                        if failed {
                            failed_count += 1;
                        } else {
                            done_count += 1;
                        }
                    }
                    Some(WorkerMessage::Expand { children }) => {
                        if cancelled {
                            debug!("Dropping {} expanded entries after cancel", children.len());
                        } else {
                            for child in children {
                                enqueue(&shared, &mut aggregator, &mut pending, &states, child)
                                    .await;
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                if !pending.is_empty() {
                    info!(
                        "Cancel requested; {} queued task(s) will not start",
                        pending.len()
                    );
                }
                pending.clear();
            }
        }
    }

    info!("Batch finished: {} done, {} failed", done_count, failed_count);
    aggregator.complete(done_count, failed_count).await;
}

async fn run_worker(
    shared: Arc<EngineShared>,
    task: QueuedTask,
    permit: OwnedSemaphorePermit,
    driver: mpsc::UnboundedSender<WorkerMessage>,
    states: Arc<DashMap<String, TaskState>>,
    cancel: CancellationToken,
) {
    let QueuedTask { descriptor, events } = task;

    let failed = match execute_task(&shared, &descriptor, &events, &driver, &states, &cancel).await
    {
        Ok(()) => false,
        Err(e) => {
            warn!("Task {} failed: {}", descriptor.id, e);
            announce(
                &states,
                &events,
                ProgressEvent::transition(&descriptor.id, TaskState::failed(e.to_string())),
            )
            .await;
            true
        }
    };

    // release the slot before reporting, so the driver's next fill pass
    // already sees it free
    drop(permit);
    let _ = driver.send(WorkerMessage::Finished { failed });
}

/// One task's full pipeline: download, then the format's postprocessing.
/// Emits every state transition except the failure terminal, which the
/// worker derives from the returned error.
async fn execute_task(
    shared: &EngineShared,
    task: &TaskDescriptor,
    events: &TaskEventSender,
    driver: &mpsc::UnboundedSender<WorkerMessage>,
    states: &DashMap<String, TaskState>,
    cancel: &CancellationToken,
) -> AppResult<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    announce(
        states,
        events,
        ProgressEvent::transition(&task.id, TaskState::Downloading),
    )
    .await;

    if task.wants_expansion() {
        return expand_playlist(shared, task, events, driver, states, cancel).await;
    }

    let artifact = shared
        .extractor
        .download(task, events.clone(), cancel.clone())
        .await?;

    if task.requested_format.is_video() {
        if let Some(subtitles) = &artifact.subtitle_path {
            announce(
                states,
                events,
                ProgressEvent::transition(&task.id, TaskState::Postprocessing),
            )
            .await;
            shared
                .encoder
                .embed_subtitles(&artifact.media_path, subtitles, cancel.clone())
                .await?;
        }
    } else {
        // bestaudio may land as native mp3; ffmpeg cannot read and write
        // the same path
        let already_mp3 = artifact
            .media_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
        if !already_mp3 {
            announce(
                states,
                events,
                ProgressEvent::transition(&task.id, TaskState::Postprocessing),
            )
            .await;
            let target = artifact.media_path.with_extension("mp3");
            shared
                .encoder
                .extract_audio(&artifact.media_path, &target, cancel.clone())
                .await?;
        }
    }

    announce(
        states,
        events,
        ProgressEvent::transition(&task.id, TaskState::Done),
    )
    .await;
    Ok(())
}

/// Resolve a playlist parent into per-entry children. The children go to
/// the driver for the queue tail; the parent itself finishes as done.
async fn expand_playlist(
    shared: &EngineShared,
    task: &TaskDescriptor,
    events: &TaskEventSender,
    driver: &mpsc::UnboundedSender<WorkerMessage>,
    states: &DashMap<String, TaskState>,
    cancel: &CancellationToken,
) -> AppResult<()> {
    let playlist = shared
        .extractor
        .list_playlist(&task.url, cancel.clone())
        .await?;
    let subfolder = task.destination_dir.join(sanitize_filename(&playlist.title));
    let children: Vec<TaskDescriptor> = playlist
        .entries
        .iter()
        .map(|entry| TaskDescriptor::child_of(task, entry.url.as_str(), subfolder.clone()))
        .collect();
    let count = children.len();
    info!(
        "Expanded playlist '{}' into {} entries",
        playlist.title, count
    );

    if driver.send(WorkerMessage::Expand { children }).is_err() {
        // driver gone means the session is being torn down
        return Err(AppError::Cancelled);
    }

    announce(
        states,
        events,
        ProgressEvent::transition_with_message(
            &task.id,
            TaskState::Done,
            format!("expanded into {} entries", count),
        ),
    )
    .await;
    Ok(())
}

/// Record the transition in the session's state table, then put it on
/// the wire. Transitions use the blocking send so they are never
/// dropped; numeric updates go through `try_send` in the adapters.
async fn announce(
    states: &DashMap<String, TaskState>,
    events: &TaskEventSender,
    event: ProgressEvent,
) {
    states.insert(event.task_id.clone(), event.new_state.clone());
    if events.send(event).await.is_err() {
        debug!("Progress channel closed before event delivery");
    }
}
