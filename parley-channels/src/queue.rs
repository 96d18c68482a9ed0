//! Per-conversation processing lanes.
//!
//! Every conversation gets one lane: an unbounded FIFO and a worker task that
//! drains it one item at a time. Items in a lane never overlap and are handled
//! in arrival order; lanes of different conversations run in parallel. Items
//! that need a model call first take a permit from a pool shared by all lanes.
//!
//! ```text
//! enqueue ─→ lanes[conversation_id] ─→ worker ─→ [permit] ─→ LaneProcessor
//! ```

use crate::message::InboundMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use parley_common::{Error, Result};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;

/// What a lane does with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Remember the message and answer it; needs a model call.
    Respond,
    /// Remember the message only.
    Remember,
}

impl WorkKind {
    pub fn needs_model(self) -> bool {
        matches!(self, Self::Respond)
    }
}

/// A queued message.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub message: InboundMessage,
    pub kind: WorkKind,
    pub enqueued_at: Instant,
}

impl WorkItem {
    pub fn new(message: InboundMessage, kind: WorkKind) -> Self {
        Self {
            message,
            kind,
            enqueued_at: Instant::now(),
        }
    }
}

/// Handles items popped from a lane.
#[async_trait]
pub trait LaneProcessor: Send + Sync + 'static {
    async fn process(&self, item: WorkItem) -> Result<()>;
}

/// Observable state of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    Idle,
    Draining { queued: usize },
}

struct Lane {
    tx: mpsc::UnboundedSender<WorkItem>,
    pending: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

/// Counters shared between the queue and its workers.
#[derive(Default)]
struct Progress {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Marks an item done when dropped, whatever happened to it.
struct Completion {
    pending: Arc<AtomicUsize>,
    progress: Arc<Progress>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        // Shutdown zeroes the counters while aborted workers still hold
        // completions, so never wrap below zero.
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        let previous = self
            .progress
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.progress.idle.notify_waiters();
        }
    }
}

/// Lanes keyed by conversation id.
pub struct ConversationQueue {
    lanes: DashMap<String, Lane>,
    processor: Arc<dyn LaneProcessor>,
    permits: Arc<Semaphore>,
    progress: Arc<Progress>,
    shutdown: AtomicBool,
}

impl ConversationQueue {
    /// Create a queue allowing at most `max_concurrent_model_calls` items
    /// that need a model call to run at once across all lanes.
    pub fn new(processor: Arc<dyn LaneProcessor>, max_concurrent_model_calls: usize) -> Self {
        Self {
            lanes: DashMap::new(),
            processor,
            permits: Arc::new(Semaphore::new(max_concurrent_model_calls.max(1))),
            progress: Arc::new(Progress::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Append an item to its conversation's lane, spawning the lane worker
    /// on first use. Must be called from within a tokio runtime.
    ///
    /// Fails with `Error::ChannelSend` after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ChannelSend);
        }

        let conversation_id = item.message.conversation_id.clone();
        let entry = self.lanes.entry(conversation_id.clone());
        // Re-checked under the shard lock: shutdown sets the flag before its
        // retain, so any lane inserted here is seen and aborted by it.
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ChannelSend);
        }
        let lane = entry.or_insert_with(|| self.spawn_lane(&conversation_id));

        lane.pending.fetch_add(1, Ordering::SeqCst);
        self.progress.outstanding.fetch_add(1, Ordering::SeqCst);

        if lane.tx.send(item).is_err() {
            // Roll the counters back through the same path a worker uses.
            drop(Completion {
                pending: lane.pending.clone(),
                progress: self.progress.clone(),
            });
            return Err(Error::ChannelSend);
        }
        Ok(())
    }

    fn spawn_lane(&self, conversation_id: &str) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tracing::debug!(conversation_id, "Starting conversation lane");
        let handle = tokio::spawn(run_lane(
            conversation_id.to_string(),
            rx,
            self.processor.clone(),
            self.permits.clone(),
            pending.clone(),
            self.progress.clone(),
        ));

        Lane { tx, pending, handle }
    }

    pub fn lane_state(&self, conversation_id: &str) -> LaneState {
        match self
            .lanes
            .get(conversation_id)
            .map(|lane| lane.pending.load(Ordering::SeqCst))
        {
            Some(queued) if queued > 0 => LaneState::Draining { queued },
            _ => LaneState::Idle,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Items enqueued but not yet finished, across all lanes.
    pub fn outstanding(&self) -> usize {
        self.progress.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued item has finished. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let progress = self.progress.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                let notified = progress.idle.notified();
                if progress.outstanding.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Stop all lanes. In-flight items are cancelled and queued items are
    /// dropped; later [`enqueue`](Self::enqueue) calls are rejected.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let lanes = self.lanes.len();
        self.lanes.retain(|_, lane| {
            lane.handle.abort();
            false
        });
        self.progress.outstanding.store(0, Ordering::SeqCst);
        self.progress.idle.notify_waiters();

        tracing::info!(lanes, "Conversation queue shut down");
    }
}

impl Drop for ConversationQueue {
    fn drop(&mut self) {
        for lane in self.lanes.iter() {
            lane.handle.abort();
        }
    }
}

async fn run_lane(
    conversation_id: String,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    processor: Arc<dyn LaneProcessor>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    progress: Arc<Progress>,
) {
    while let Some(item) = rx.recv().await {
        let _done = Completion {
            pending: pending.clone(),
            progress: progress.clone(),
        };

        let permit = if item.kind.needs_model() {
            match permits.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::debug!(conversation_id = %conversation_id, "Permit pool closed, stopping lane");
                    break;
                }
            }
        } else {
            None
        };

        let message_id = item.message.message_id.clone();
        let kind = item.kind;
        let waited_ms = item.enqueued_at.elapsed().as_millis() as u64;

        let outcome = AssertUnwindSafe(processor.process(item)).catch_unwind().await;
        drop(permit);

        match outcome {
            Ok(Ok(())) => {
                tracing::trace!(conversation_id = %conversation_id, message_id = %message_id, ?kind, waited_ms, "Processed item");
            }
            Ok(Err(e)) => {
                tracing::error!(conversation_id = %conversation_id, message_id = %message_id, ?kind, error = %e, "Failed to process item");
            }
            Err(panic) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    ?kind,
                    panic = panic_message(panic.as_ref()),
                    "Lane processor panicked"
                );
            }
        }
    }

    tracing::debug!(conversation_id = %conversation_id, "Conversation lane stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
