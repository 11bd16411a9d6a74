//! Per-job broadcast bus.
//!
//! Each subscriber owns a bounded channel drained by its SSE writer. The
//! producer never blocks: a full or closed channel drops the sink, so one
//! slow consumer cannot stall ingestion or starve the others. Accepted
//! items are kept for replay; a subscriber joining late sees `connected`,
//! the accepted items so far, then the live stream (or the terminal frame
//! if the job already ended).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use websift_common::StreamFrame;
use websift_dedup::DedupSink;

/// Frames buffered per subscriber before it is considered too slow.
const SINK_CAPACITY: usize = 256;

struct BusInner {
    sinks: Vec<mpsc::Sender<StreamFrame>>,
    /// Raw payloads of accepted items, in acceptance order.
    replay: Vec<Value>,
    /// Set once the job has finished or errored.
    terminal: Option<StreamFrame>,
}

pub struct JobBus {
    webset_id: String,
    inner: Mutex<BusInner>,
    processed: AtomicU64,
    rejected: AtomicU64,
}

impl JobBus {
    pub fn new(webset_id: String) -> Self {
        Self {
            webset_id,
            inner: Mutex::new(BusInner {
                sinks: Vec::new(),
                replay: Vec::new(),
                terminal: None,
            }),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. The returned receiver starts with `connected`
    /// and the accepted-item replay; it joins the live stream unless the job
    /// already ended, in which case the terminal frame closes it out.
    pub fn subscribe(&self) -> mpsc::Receiver<StreamFrame> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");

        let capacity = SINK_CAPACITY.max(inner.replay.len() + 16);
        let (tx, rx) = mpsc::channel(capacity);

        let _ = tx.try_send(StreamFrame::Connected {
            webset_id: self.webset_id.clone(),
        });
        for item in &inner.replay {
            let _ = tx.try_send(StreamFrame::Item { item: item.clone() });
        }

        match &inner.terminal {
            Some(frame) => {
                // Deliver the terminal frame and let the channel close.
                let _ = tx.try_send(frame.clone());
            }
            None => inner.sinks.push(tx),
        }
        rx
    }

    /// Deliver a frame to every live subscriber, best-effort and in order.
    pub fn broadcast(&self, frame: StreamFrame) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");

        match &frame {
            StreamFrame::Item { item } => {
                inner.replay.push(item.clone());
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            StreamFrame::Confirm { data } => {
                inner.replay.push(data.clone());
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            StreamFrame::Rejected { .. } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            StreamFrame::Finished { .. } | StreamFrame::Error { .. } => {
                inner.terminal = Some(frame.clone());
            }
            _ => {}
        }

        let before = inner.sinks.len();
        inner.sinks.retain(|tx| tx.try_send(frame.clone()).is_ok());
        let dropped = before - inner.sinks.len();
        if dropped > 0 {
            debug!(
                webset_id = %self.webset_id,
                dropped,
                "Dropped slow or closed subscribers"
            );
        }

        // The terminal frame is the last one anyone receives.
        if inner.terminal.is_some() {
            inner.sinks.clear();
        }
    }

    /// (accepted broadcasts, rejected broadcasts) so far.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").sinks.len()
    }
}

#[async_trait]
impl DedupSink for JobBus {
    async fn emit(&self, frame: StreamFrame) {
        self.broadcast(frame);
    }
}
