//! Per-blobber commit workers.
//!
//! Architecture:
//! - `CommitPool` owns a registry mapping blobber ID to that blobber's queue.
//! - Each queue is a bounded MPSC channel drained by exactly one worker task,
//!   so a blobber never has more than one commit in flight and its chain is
//!   extended in arrival order.
//! - The registry lock is only taken to look up, create or delete an entry;
//!   requests themselves are handed over through the channel.
//! - A worker whose queue closes removes its own registry entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use zbox_protocol::{Blobber, WriteMarker};

use crate::{CommitBatch, CommitError, MarkerChain};

/// The outcome of one commit on one blobber.
pub type CommitOutcome = Result<WriteMarker, CommitError>;

/// Serializable summary of a commit outcome, for reporting to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub success: bool,
    #[serde(rename = "error_msg", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&CommitOutcome> for CommitResult {
    fn from(outcome: &CommitOutcome) -> Self {
        match outcome {
            Ok(_) => Self {
                success: true,
                error_message: None,
            },
            Err(e) => Self {
                success: false,
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// A queued commit: the batch plus the slot its outcome is delivered to.
pub struct CommitRequest {
    pub batch: CommitBatch,
    reply: oneshot::Sender<CommitOutcome>,
}

/// Resolves to the outcome of an enqueued commit.
pub struct CommitHandle {
    blobber_id: String,
    rx: oneshot::Receiver<CommitOutcome>,
}

impl CommitHandle {
    pub fn blobber_id(&self) -> &str {
        &self.blobber_id
    }

    /// Wait for the worker to finish the commit.
    pub async fn wait(self) -> CommitOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CommitError::QueueClosed(self.blobber_id)),
        }
    }
}

struct QueueEntry {
    tx: mpsc::Sender<CommitRequest>,
    /// Distinguishes this worker from a later one registered under the same ID.
    generation: u64,
}

type Registry = Arc<Mutex<HashMap<String, QueueEntry>>>;

/// Registry of per-blobber commit queues.
#[derive(Clone)]
pub struct CommitPool {
    chain: MarkerChain,
    queue_depth: usize,
    registry: Registry,
    next_generation: Arc<AtomicU64>,
}

impl CommitPool {
    pub fn new(chain: MarkerChain, queue_depth: usize) -> Self {
        Self {
            chain,
            queue_depth: queue_depth.max(1),
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a queue and worker for every blobber not already registered.
    ///
    /// Idempotent: blobbers that already have a worker are skipped.
    /// Returns the number of workers started.
    pub async fn open(&self, blobbers: &[Blobber]) -> usize {
        let mut registry = self.registry.lock().await;
        let mut started = 0;
        for blobber in blobbers {
            if registry.contains_key(&blobber.id) {
                continue;
            }
            let (tx, rx) = mpsc::channel(self.queue_depth);
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            registry.insert(blobber.id.clone(), QueueEntry { tx, generation });

            tokio::spawn(run_worker(
                blobber.id.clone(),
                generation,
                rx,
                self.chain.clone(),
                Arc::clone(&self.registry),
            ));
            started += 1;

            tracing::info!(blobber = %blobber, "Started commit worker");
        }
        started
    }

    /// Close every queue. Workers finish what is already queued, then exit.
    pub async fn close(&self) {
        let mut registry = self.registry.lock().await;
        let closed = registry.len();
        registry.clear();
        tracing::info!(queues = closed, "Closed commit queues");
    }

    /// IDs of blobbers with a registered queue, sorted.
    pub async fn registered(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<String> = registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_registered(&self, blobber_id: &str) -> bool {
        self.registry.lock().await.contains_key(blobber_id)
    }

    /// Queue `batch` on its blobber's worker.
    ///
    /// Waits while the queue is full. The returned handle resolves once the
    /// worker has processed the batch.
    pub async fn enqueue(&self, batch: CommitBatch) -> Result<CommitHandle, CommitError> {
        let blobber_id = batch.blobber.id.clone();
        let tx = {
            let registry = self.registry.lock().await;
            registry
                .get(&blobber_id)
                .map(|entry| entry.tx.clone())
                .ok_or_else(|| CommitError::UnknownBlobber(blobber_id.clone()))?
        };

        let (reply, rx) = oneshot::channel();
        tx.send(CommitRequest { batch, reply })
            .await
            .map_err(|_| CommitError::QueueClosed(blobber_id.clone()))?;

        Ok(CommitHandle { blobber_id, rx })
    }
}

async fn run_worker(
    blobber_id: String,
    generation: u64,
    mut rx: mpsc::Receiver<CommitRequest>,
    chain: MarkerChain,
    registry: Registry,
) {
    while let Some(request) = rx.recv().await {
        let outcome = chain.commit(&request.batch).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                blobber = %blobber_id,
                connection = %request.batch.connection_id,
                error = %e,
                "Commit failed"
            );
        }
        // The caller may have stopped waiting.
        let _ = request.reply.send(outcome);
    }

    let mut registry = registry.lock().await;
    if registry
        .get(&blobber_id)
        .is_some_and(|entry| entry.generation == generation)
    {
        registry.remove(&blobber_id);
    }
    tracing::debug!(blobber = %blobber_id, "Commit worker stopped");
}
