//! Queue of documents awaiting background processing.
//!
//! Document state survives restarts in the database; the queue itself only
//! tracks what is in flight right now, deduplicating concurrent triggers
//! for the same document.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle for submitting documents to the pipeline workers
#[derive(Clone)]
pub struct PipelineQueue {
    /// Documents currently queued or being processed
    in_flight: Arc<DashMap<Uuid, ()>>,
    sender: mpsc::Sender<Uuid>,
    depth: Arc<AtomicUsize>,
    worker_count: usize,
}

impl PipelineQueue {
    pub fn new(worker_count: usize, capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            in_flight: Arc::new(DashMap::new()),
            sender,
            depth: Arc::new(AtomicUsize::new(0)),
            worker_count,
        };
        (queue, receiver)
    }

    /// Submit a document for processing. Returns false when the document is
    /// already queued or being processed, so concurrent upload and retry
    /// triggers collapse into one pass.
    pub async fn enqueue(&self, document_id: Uuid) -> bool {
        if self.in_flight.insert(document_id, ()).is_some() {
            return false;
        }
        self.depth.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.sender.send(document_id).await {
            tracing::error!("Failed to enqueue document {}: {}", document_id, e);
            self.in_flight.remove(&document_id);
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Called by the worker once a document's pass finishes, terminal or not
    pub fn mark_done(&self, document_id: Uuid) {
        if self.in_flight.remove(&document_id).is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_in_flight(&self, document_id: Uuid) -> bool {
        self.in_flight.contains_key(&document_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            in_flight: self.depth.load(Ordering::SeqCst),
            worker_count: self.worker_count,
        }
    }
}

/// Queue statistics reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub in_flight: usize,
    pub worker_count: usize,
}
