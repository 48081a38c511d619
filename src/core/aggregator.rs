//! Progress aggregation and UI bridging
//!
//! Serializes concurrently produced per-task events into one ordered
//! stream consumable by a single-threaded presentation layer. Events for
//! one task arrive in production order; events for different tasks may
//! interleave. When the consumer is slower than the producers, runs of
//! numeric updates for the same task collapse to the latest value, while
//! state transitions (Done and Failed above all) always get through.

use std::collections::VecDeque;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::models::{BatchEvent, TaskEventReceiver};

/// Owns the merge of per-task channels into the UI-facing stream
pub struct ProgressAggregator {
    source_tx: mpsc::UnboundedSender<BatchEvent>,
    pumps: Vec<JoinHandle<()>>,
    bridge: JoinHandle<()>,
}

impl ProgressAggregator {
    /// Create the aggregator plus the receiver handed to the consumer
    pub fn new(ui_buffer: usize) -> (Self, mpsc::Receiver<BatchEvent>) {
        let (source_tx, source_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::channel(ui_buffer.max(1));
        let bridge = tokio::spawn(run_bridge(source_rx, ui_tx));

        (
            Self {
                source_tx,
                pumps: Vec::new(),
                bridge,
            },
            ui_rx,
        )
    }

    /// Attach one task's bounded channel. A dedicated pump forwards it
    /// into the shared stream, so per-task order survives the merge.
    pub fn attach_task(&mut self, mut events: TaskEventReceiver) {
        let tx = self.source_tx.clone();
        self.pumps.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(BatchEvent::Task(event)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Drain every pump, deliver the end-of-batch marker last, and let
    /// the stream close.
    pub async fn complete(self, done_count: usize, failed_count: usize) {
        let ProgressAggregator {
            source_tx,
            pumps,
            bridge,
        } = self;

        for outcome in join_all(pumps).await {
            if let Err(e) = outcome {
                warn!("Progress pump ended abnormally: {}", e);
            }
        }

        let _ = source_tx.send(BatchEvent::BatchComplete {
            done_count,
            failed_count,
        });
        drop(source_tx);

        if let Err(e) = bridge.await {
            warn!("UI bridge ended abnormally: {}", e);
        }
    }
}

async fn run_bridge(
    mut source: mpsc::UnboundedReceiver<BatchEvent>,
    ui_tx: mpsc::Sender<BatchEvent>,
) {
    let mut buffer: VecDeque<BatchEvent> = VecDeque::new();
    let mut source_open = true;

    loop {
        if buffer.is_empty() {
            if !source_open {
                break;
            }
            match source.recv().await {
                Some(event) => buffer_event(&mut buffer, event),
                None => source_open = false,
            }
            continue;
        }

        tokio::select! {
            permit = ui_tx.reserve() => {
                match permit {
                    Ok(permit) => {
                        if let Some(event) = buffer.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        debug!("UI receiver dropped; discarding remaining events");
                        return;
                    }
                }
            }
            incoming = source.recv(), if source_open => {
                match incoming {
                    Some(event) => buffer_event(&mut buffer, event),
                    None => source_open = false,
                }
            }
        }
    }
}

/// Queue an event, coalescing runs of numeric updates per task: the
/// newest buffered numeric for the same task is replaced in place (its
/// queue position holds), but never across a state transition.
pub(crate) fn buffer_event(buffer: &mut VecDeque<BatchEvent>, incoming: BatchEvent) {
    if let BatchEvent::Task(incoming_task) = &incoming {
        if incoming_task.is_coalescable() {
            for buffered in buffer.iter_mut().rev() {
                let BatchEvent::Task(existing) = buffered else {
                    continue;
                };
                if existing.task_id != incoming_task.task_id {
                    continue;
                }
                if existing.is_coalescable() {
                    *existing = incoming_task.clone();
                    return;
                }
                // a transition sits between; ordering must hold
                break;
            }
        }
    }
    buffer.push_back(incoming);
}
