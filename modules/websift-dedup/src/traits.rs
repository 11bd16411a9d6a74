//! Seams between the engine and its collaborators. The server wires real
//! implementations (broadcast bus, Postgres store, vector service); tests
//! substitute recording fakes.

use anyhow::Result;
use async_trait::async_trait;

use vector_client::VectorClient;
use websift_common::{ItemRecord, ItemStatus, RejectionReason, StreamFrame};

/// Where the engine's stream frames go. Implementations must not block the
/// producer; slow consumers are the sink's problem.
#[async_trait]
pub trait DedupSink: Send + Sync {
    async fn emit(&self, frame: StreamFrame);
}

/// Recall index over accepted rows. Errors degrade recall, never block
/// acceptance, so the engine treats them as empty results.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, row_id: &str, text: &str) -> Result<()>;
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>>;
}

#[async_trait]
impl VectorIndex for vector_client::VectorClient {
    async fn add(&self, row_id: &str, text: &str) -> Result<()> {
        VectorClient::add(self, row_id, text)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        VectorClient::query(self, text, k)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

/// The counter delta recorded for one item outcome. Each variant bumps
/// `total_items` and/or one of the outcome counters atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBump {
    /// Direct accept: total + unique.
    Accepted,
    /// Direct reject: total + duplicates + reason counter.
    Rejected(RejectionReason),
    /// Item went pending: total only.
    Pending,
    /// Pending item confirmed: unique.
    PendingAccepted,
    /// Pending item dropped: duplicates + reason counter.
    PendingRejected(RejectionReason),
}

/// Durable record of items and per-job counters. All methods are
/// best-effort from the engine's point of view; persistence failures are
/// logged and ingestion continues.
#[async_trait]
pub trait ItemWriter: Send + Sync {
    async fn insert_item(&self, record: &ItemRecord) -> Result<()>;

    async fn bump_counters(&self, job_id: &str, bump: CounterBump) -> Result<()>;

    /// Move a pending item record to its terminal status.
    async fn resolve_pending(
        &self,
        job_id: &str,
        item_id: &str,
        status: ItemStatus,
        reason: Option<RejectionReason>,
        details: Option<&str>,
    ) -> Result<()>;
}
