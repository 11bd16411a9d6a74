//! The per-job dedup engine.
//!
//! One engine owns all dedup state for one job: fingerprint table, entity
//! indices, pending registry, LLM batch queue, and host-pair cache. Entity
//! jobs process items on a serial queue so every accepted row (including
//! its vector-index entry) is visible before the next item is checked;
//! company jobs may ingest concurrently, with only the adjudicator
//! serialized.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use ai_client::JsonCompleter;
use websift_common::{DedupMode, ItemRecord, ItemStatus, RejectionReason, StreamFrame};

use crate::adjudicator::Adjudicator;
use crate::candidates::{self, EntityPool};
use crate::canonical::{self, CanonicalRow};
use crate::fingerprint::FingerprintTable;
use crate::fuzzy::{self, FuzzyVerdict};
use crate::pending::{
    sorted_host_pair, CandidateRef, CompanyCandidateRef, PendingDecision, PendingRegistry,
};
use crate::traits::{CounterBump, DedupSink, ItemWriter, VectorIndex};
use crate::url_resolve::UrlResolver;

const VECTOR_RECALL_K: usize = 5;
const ENTITY_QUEUE_DEPTH: usize = 64;

/// Collaborators handed to a new engine. The LLM gate is process-wide; all
/// other dependencies may be shared or per job as the caller prefers.
pub struct EngineDeps {
    pub sink: Arc<dyn DedupSink>,
    pub store: Arc<dyn ItemWriter>,
    pub vector: Option<Arc<dyn VectorIndex>>,
    pub llm: Option<Arc<dyn JsonCompleter>>,
    pub llm_gate: Arc<Semaphore>,
    pub resolver: Option<Arc<UrlResolver>>,
}

struct EngineState {
    table: FingerprintTable,
    processed_ids: HashSet<String>,
    /// Entity mode: accepted URL → row id.
    processed_urls: HashMap<String, String>,
    /// Entity mode: accepted normalized title → row id.
    processed_titles: HashMap<String, String>,
    /// sorted(hostA, hostB) → was the pair judged duplicate.
    llm_cache: HashMap<(String, String), bool>,
}

struct QueuedItem {
    raw: Value,
    done: oneshot::Sender<()>,
}

/// Handle to one job's engine. Cheap to clone.
#[derive(Clone)]
pub struct DedupEngine {
    inner: Arc<EngineInner>,
    queue_tx: Option<mpsc::Sender<QueuedItem>>,
}

impl DedupEngine {
    pub fn new(job_id: String, mode: DedupMode, passthrough: bool, deps: EngineDeps) -> Self {
        let adjudicator = Adjudicator::new(mode, deps.llm, deps.llm_gate);
        let inner = Arc::new(EngineInner {
            job_id,
            mode,
            passthrough,
            sink: deps.sink,
            store: deps.store,
            vector: deps.vector,
            resolver: deps.resolver,
            state: Mutex::new(EngineState {
                table: FingerprintTable::new(),
                processed_ids: HashSet::new(),
                processed_urls: HashMap::new(),
                processed_titles: HashMap::new(),
                llm_cache: HashMap::new(),
            }),
            pending: PendingRegistry::new(),
            adjudicator,
        });

        // Entity jobs get a serial queue with one consumer; the sender side
        // awaits per-item completion, giving a strict happens-before between
        // consecutive items.
        let queue_tx = if mode == DedupMode::Entity {
            let (tx, mut rx) = mpsc::channel::<QueuedItem>(ENTITY_QUEUE_DEPTH);
            let consumer = inner.clone();
            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    consumer.clone().process_item(item.raw).await;
                    let _ = item.done.send(());
                }
            });
            Some(tx)
        } else {
            None
        };

        Self { inner, queue_tx }
    }

    /// Feed one raw upstream item through the pipeline. Re-ingesting an
    /// already-processed id is a no-op.
    pub async fn ingest(&self, raw: Value) {
        match &self.queue_tx {
            Some(tx) => {
                let (done_tx, done_rx) = oneshot::channel();
                if tx
                    .send(QueuedItem {
                        raw,
                        done: done_tx,
                    })
                    .await
                    .is_err()
                {
                    warn!(job_id = %self.inner.job_id, "Engine queue closed; dropping item");
                    return;
                }
                let _ = done_rx.await;
            }
            None => self.inner.clone().process_item(raw).await,
        }
    }

    /// Flush the LLM queue and wait until every pending item has reached a
    /// terminal state. Call before emitting `finished`.
    pub async fn drain(&self) {
        self.inner.adjudicator.flush().await;
        self.inner.pending.wait_idle().await;
    }

    pub fn mode(&self) -> DedupMode {
        self.inner.mode
    }

    pub fn accepted_count(&self) -> usize {
        self.inner.state.lock().expect("engine state lock poisoned").table.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

struct EngineInner {
    job_id: String,
    mode: DedupMode,
    passthrough: bool,
    sink: Arc<dyn DedupSink>,
    store: Arc<dyn ItemWriter>,
    vector: Option<Arc<dyn VectorIndex>>,
    resolver: Option<Arc<UrlResolver>>,
    state: Mutex<EngineState>,
    pending: PendingRegistry,
    adjudicator: Adjudicator,
}

impl EngineInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state lock poisoned")
    }

    async fn process_item(self: Arc<Self>, raw: Value) {
        let row = canonical::canonicalize(&raw, self.mode);

        {
            let mut st = self.lock();
            if !st.processed_ids.insert(row.row_id.clone()) {
                debug!(job_id = %self.job_id, row_id = %row.row_id, "Item already processed");
                return;
            }
        }

        if self.passthrough {
            self.accept(row, false).await;
            return;
        }

        match self.mode {
            DedupMode::Company => self.process_company(row).await,
            DedupMode::Entity => self.process_entity(row).await,
        }
    }

    async fn process_company(self: Arc<Self>, row: CanonicalRow) {
        // Tier 0: exact fingerprint collision.
        let tier0_hit = self.lock().table.lookup(&row.tier0_key()).cloned();
        if let Some(existing) = tier0_hit {
            let details = format!(
                "Exact fingerprint match ({}) with \"{}\"",
                row.tier0_key(),
                existing.name
            );
            self.reject(
                &row,
                RejectionReason::ExactMatch,
                details,
                Some(&existing),
                Some(1.0),
                "exact_fingerprint",
            )
            .await;
            return;
        }

        // Tier 1: deterministic fuzzy rules against every accepted row.
        let snapshot: Vec<CanonicalRow> = self.lock().table.rows().cloned().collect();
        let mut ambiguous: Vec<CanonicalRow> = Vec::new();
        for existing in &snapshot {
            match fuzzy::compare(&row, existing, self.mode) {
                FuzzyVerdict::Duplicate { reason, similarity } => {
                    let details =
                        format!("Fuzzy match with \"{}\" ({:.3})", existing.name, similarity);
                    self.reject(&row, reason, details, Some(existing), Some(similarity), "fuzzy_match")
                        .await;
                    return;
                }
                FuzzyVerdict::Ambiguous { similarity } => {
                    if self.cached_duplicate(&row, existing) {
                        let details = format!(
                            "Host pair ({}, {}) previously judged duplicate",
                            row.host, existing.host
                        );
                        self.reject(
                            &row,
                            RejectionReason::CacheHit,
                            details,
                            Some(existing),
                            Some(similarity),
                            "llm_cache",
                        )
                        .await;
                        return;
                    }
                    ambiguous.push(existing.clone());
                }
                FuzzyVerdict::Unique => {}
            }
        }

        // HEAD resolution: two sites redirecting to the same host are one.
        if let Some(resolver) = &self.resolver {
            if !ambiguous.is_empty() && !row.url.is_empty() {
                if let Some(new_final) = resolver.resolve(&row.url).await {
                    for existing in &ambiguous {
                        if existing.url.is_empty() {
                            continue;
                        }
                        if resolver.resolve(&existing.url).await.as_deref() == Some(&new_final) {
                            let details = format!(
                                "Both URLs resolve to {} (existing \"{}\")",
                                new_final, existing.name
                            );
                            self.reject(
                                &row,
                                RejectionReason::UrlResolutionDuplicate,
                                details,
                                Some(existing),
                                None,
                                "url_resolution",
                            )
                            .await;
                            return;
                        }
                    }
                }
            }
        }

        // Candidate pool: fuzzy-ambiguous rows plus vector recall.
        let mut pool = ambiguous;
        for hit in self
            .vector_recall(&row, &[row.name.as_str(), row.url.as_str(), row.etld1.as_str()])
            .await
        {
            if pool.iter().all(|c| c.row_id != hit.row_id) {
                pool.push(hit);
            }
        }

        let ranked = candidates::rank_company(&row, pool);
        if ranked.is_empty() {
            self.accept(row, false).await;
            return;
        }

        let decision = PendingDecision::Company {
            job_id: self.job_id.clone(),
            id_new: row.row_id.clone(),
            name_new: row.name.clone(),
            url_new: row.url.clone(),
            brand_new: row.brand.clone(),
            etld1_new: row.etld1.clone(),
            candidates: ranked
                .iter()
                .map(|c| CompanyCandidateRef {
                    id: c.row.row_id.clone(),
                    name: c.row.name.clone(),
                    url: c.row.url.clone(),
                    brand: c.row.brand.clone(),
                    etld1: c.row.etld1.clone(),
                })
                .collect(),
            raw_new: row.raw.clone(),
        };
        self.stage_pending(row, decision).await;
    }

    async fn process_entity(self: Arc<Self>, row: CanonicalRow) {
        // Bulletproof layers: exact URL and normalized-title indices.
        let (url_hit, title_hit) = {
            let st = self.lock();
            let url_hit = if row.url.is_empty() {
                None
            } else {
                st.processed_urls
                    .get(&row.url)
                    .and_then(|id| st.table.get(id).cloned())
            };
            let title_hit = if row.normalized_title.is_empty() {
                None
            } else {
                st.processed_titles
                    .get(&row.normalized_title)
                    .and_then(|id| st.table.get(id).cloned())
            };
            (url_hit, title_hit)
        };

        if let Some(existing) = url_hit {
            let details = format!("Exact URL already accepted as \"{}\"", existing.name);
            self.reject(
                &row,
                RejectionReason::ExactUrlDuplicate,
                details,
                Some(&existing),
                Some(1.0),
                "exact_url",
            )
            .await;
            return;
        }
        if let Some(existing) = title_hit {
            let details = format!(
                "Normalized title \"{}\" already accepted as \"{}\"",
                row.normalized_title, existing.name
            );
            self.reject(
                &row,
                RejectionReason::NormalizedTitleDuplicate,
                details,
                Some(&existing),
                Some(1.0),
                "normalized_title",
            )
            .await;
            return;
        }

        // Fuzzy pass. Video-platform ambiguity takes the pair path straight
        // to the adjudicator; everything else joins the candidate pool.
        let snapshot: Vec<CanonicalRow> = self.lock().table.rows().cloned().collect();
        let mut ambiguous: Vec<CanonicalRow> = Vec::new();
        let mut video_match: Option<(CanonicalRow, f64)> = None;
        for existing in &snapshot {
            match fuzzy::compare(&row, existing, self.mode) {
                FuzzyVerdict::Duplicate { reason, similarity } => {
                    let details =
                        format!("Fuzzy match with \"{}\" ({:.3})", existing.name, similarity);
                    self.reject(&row, reason, details, Some(existing), Some(similarity), "fuzzy_match")
                        .await;
                    return;
                }
                FuzzyVerdict::Ambiguous { similarity } => {
                    if self.cached_duplicate(&row, existing) {
                        let details = format!(
                            "Host pair ({}, {}) previously judged duplicate",
                            row.host, existing.host
                        );
                        self.reject(
                            &row,
                            RejectionReason::CacheHit,
                            details,
                            Some(existing),
                            Some(similarity),
                            "llm_cache",
                        )
                        .await;
                        return;
                    }
                    if row.is_video_platform && existing.is_video_platform {
                        let better = video_match
                            .as_ref()
                            .is_none_or(|(_, best)| similarity > *best);
                        if better {
                            video_match = Some((existing.clone(), similarity));
                        }
                    } else {
                        ambiguous.push(existing.clone());
                    }
                }
                FuzzyVerdict::Unique => {}
            }
        }

        if let Some((existing, _)) = video_match {
            let decision = PendingDecision::Pair {
                job_id: self.job_id.clone(),
                id_a: row.row_id.clone(),
                name_a: row.name.clone(),
                url_a: row.url.clone(),
                id_b: existing.row_id.clone(),
                name_b: existing.name.clone(),
                url_b: existing.url.clone(),
                raw_a: row.raw.clone(),
            };
            self.stage_pending(row, decision).await;
            return;
        }

        let mut vector_pool: Vec<CanonicalRow> = Vec::new();
        for hit in self
            .vector_recall(&row, &[row.name.as_str(), row.url.as_str()])
            .await
        {
            if ambiguous.iter().all(|c| c.row_id != hit.row_id) {
                vector_pool.push(hit);
            }
        }

        match candidates::rank_entity(&row, ambiguous, vector_pool) {
            EntityPool::Reject {
                existing,
                reason,
                similarity,
            } => {
                let details = format!(
                    "Title similarity {:.3} with \"{}\"",
                    similarity, existing.name
                );
                self.reject(&row, reason, details, Some(&existing), Some(similarity), "high_similarity")
                    .await;
            }
            EntityPool::Candidates(ranked) if ranked.is_empty() => {
                self.accept(row, false).await;
            }
            EntityPool::Candidates(ranked) => {
                let decision = PendingDecision::Entity {
                    job_id: self.job_id.clone(),
                    id_new: row.row_id.clone(),
                    name_new: row.name.clone(),
                    url_new: row.url.clone(),
                    candidates: ranked
                        .iter()
                        .map(|c| CandidateRef {
                            id: c.row.row_id.clone(),
                            name: c.row.name.clone(),
                            url: c.row.url.clone(),
                        })
                        .collect(),
                    raw_new: row.raw.clone(),
                };
                self.stage_pending(row, decision).await;
            }
        }
    }

    /// Query the vector service on each non-empty text and map hits back to
    /// rows still present in the fingerprint table. Unavailability degrades
    /// recall, never blocks.
    async fn vector_recall(&self, row: &CanonicalRow, texts: &[&str]) -> Vec<CanonicalRow> {
        let Some(vector) = &self.vector else {
            return Vec::new();
        };

        let mut ids: Vec<String> = Vec::new();
        for text in texts {
            if text.is_empty() {
                continue;
            }
            match vector.query(text, VECTOR_RECALL_K).await {
                Ok(hits) => ids.extend(hits),
                Err(e) => {
                    debug!(job_id = %self.job_id, error = %e, "Vector query failed; treating as no hits");
                }
            }
        }

        let mut seen = HashSet::new();
        let st = self.lock();
        ids.into_iter()
            .filter(|id| id != &row.row_id && seen.insert(id.clone()))
            .filter_map(|id| st.table.get(&id).cloned())
            .collect()
    }

    fn cached_duplicate(&self, a: &CanonicalRow, b: &CanonicalRow) -> bool {
        let Some(key) = sorted_host_pair(a.host.clone(), b.host.clone()) else {
            return false;
        };
        self.lock().llm_cache.get(&key) == Some(&true)
    }

    async fn stage_pending(self: Arc<Self>, row: CanonicalRow, decision: PendingDecision) {
        let tmp_id = row.row_id.clone();
        self.pending.register(&tmp_id, row.clone());
        self.sink
            .emit(StreamFrame::Pending {
                tmp_id: tmp_id.clone(),
            })
            .await;
        self.persist_item(&row, ItemStatus::Pending, None, None, None, None)
            .await;
        self.bump(CounterBump::Pending).await;

        let verdict_rx = self.adjudicator.enqueue(decision.clone());
        match self.mode {
            DedupMode::Entity => {
                // Serial queue discipline: the item must reach its terminal
                // state, including its vector add, before the queue admits
                // the next item. The batch timer bounds the wait.
                let is_dup = verdict_rx.await.unwrap_or(false);
                self.apply_verdict(decision, is_dup).await;
            }
            DedupMode::Company => {
                let inner = self.clone();
                tokio::spawn(async move {
                    // A dropped channel means the adjudicator was torn
                    // down; treat as unique so the item is not lost.
                    let is_dup = verdict_rx.await.unwrap_or(false);
                    inner.apply_verdict(decision, is_dup).await;
                });
            }
        }
    }

    async fn apply_verdict(self: Arc<Self>, decision: PendingDecision, is_dup: bool) {
        let tmp_id = decision.new_id().to_string();
        let Some(row) = self.pending.take(&tmp_id) else {
            return;
        };

        if let Some(key) = decision.host_pair() {
            self.lock().llm_cache.insert(key, is_dup);
        }

        if is_dup {
            let reason = match self.mode {
                DedupMode::Entity => RejectionReason::EntityLlmDuplicate,
                DedupMode::Company => RejectionReason::LlmDuplicate,
            };
            let existing = decision
                .best_candidate_id()
                .and_then(|id| self.lock().table.get(id).cloned());
            let details = match &existing {
                Some(e) => format!("LLM judged duplicate of \"{}\"", e.name),
                None => "LLM judged duplicate of an accepted item".to_string(),
            };

            self.sink
                .emit(StreamFrame::Rejected {
                    item: row.raw.clone(),
                    reason,
                    details: details.clone(),
                    existing_item: existing.map(|e| e.raw),
                })
                .await;
            self.sink
                .emit(StreamFrame::Drop {
                    tmp_id: tmp_id.clone(),
                })
                .await;

            if let Err(e) = self
                .store
                .resolve_pending(
                    &self.job_id,
                    &row.row_id,
                    ItemStatus::Rejected,
                    Some(reason),
                    Some(&details),
                )
                .await
            {
                warn!(job_id = %self.job_id, error = %e, "Failed to persist pending rejection");
            }
            self.bump(CounterBump::PendingRejected(reason)).await;
        } else {
            self.clone().accept(row, true).await;
        }

        self.pending.settle();
    }

    /// Insert an accepted row into every index and announce it. Entity mode
    /// awaits the vector add so the row is fully visible before the serial
    /// queue releases the next item.
    async fn accept(self: Arc<Self>, row: CanonicalRow, was_pending: bool) {
        {
            let mut st = self.lock();
            st.table.insert(row.clone());
            if self.mode == DedupMode::Entity {
                if !row.url.is_empty() {
                    st.processed_urls.insert(row.url.clone(), row.row_id.clone());
                }
                if !row.normalized_title.is_empty() {
                    st.processed_titles
                        .insert(row.normalized_title.clone(), row.row_id.clone());
                }
            }
        }

        if let Some(vector) = &self.vector {
            match self.mode {
                DedupMode::Entity => {
                    self.vector_add(vector, &row).await;
                }
                DedupMode::Company => {
                    let vector = vector.clone();
                    let inner = self.clone();
                    let row = row.clone();
                    tokio::spawn(async move {
                        inner.vector_add(&vector, &row).await;
                    });
                }
            }
        }

        if was_pending {
            self.sink
                .emit(StreamFrame::Confirm {
                    data: row.raw.clone(),
                })
                .await;
            if let Err(e) = self
                .store
                .resolve_pending(&self.job_id, &row.row_id, ItemStatus::Accepted, None, None)
                .await
            {
                warn!(job_id = %self.job_id, error = %e, "Failed to persist pending acceptance");
            }
            self.bump(CounterBump::PendingAccepted).await;
        } else {
            self.sink
                .emit(StreamFrame::Item {
                    item: row.raw.clone(),
                })
                .await;
            self.persist_item(&row, ItemStatus::Accepted, None, None, None, None)
                .await;
            self.bump(CounterBump::Accepted).await;
        }
    }

    async fn vector_add(&self, vector: &Arc<dyn VectorIndex>, row: &CanonicalRow) {
        if !row.name.is_empty() {
            if let Err(e) = vector.add(&row.row_id, &row.name).await {
                debug!(job_id = %self.job_id, error = %e, "Vector add (name) failed");
            }
        }
        if !row.url.is_empty() && row.url != row.name {
            if let Err(e) = vector.add(&row.row_id, &row.url).await {
                debug!(job_id = %self.job_id, error = %e, "Vector add (url) failed");
            }
        }
    }

    async fn reject(
        &self,
        row: &CanonicalRow,
        reason: RejectionReason,
        details: String,
        existing: Option<&CanonicalRow>,
        similarity: Option<f64>,
        rejected_by: &str,
    ) {
        self.sink
            .emit(StreamFrame::Rejected {
                item: row.raw.clone(),
                reason,
                details: details.clone(),
                existing_item: existing.map(|e| e.raw.clone()),
            })
            .await;
        self.persist_item(
            row,
            ItemStatus::Rejected,
            Some(reason),
            Some(details),
            similarity,
            Some(rejected_by),
        )
        .await;
        self.bump(CounterBump::Rejected(reason)).await;
    }

    async fn persist_item(
        &self,
        row: &CanonicalRow,
        status: ItemStatus,
        reason: Option<RejectionReason>,
        details: Option<String>,
        similarity: Option<f64>,
        rejected_by: Option<&str>,
    ) {
        let record = ItemRecord {
            job_id: self.job_id.clone(),
            item_id: row.row_id.clone(),
            name: row.name.clone(),
            url: row.url.clone(),
            properties: row.raw.get("properties").cloned(),
            raw_data: Some(row.raw.clone()),
            status,
            rejected_by: rejected_by.map(String::from),
            rejection_reason: reason.map(|r| r.as_str().to_string()),
            rejection_details: details,
            normalized_title: (self.mode == DedupMode::Entity
                && !row.normalized_title.is_empty())
            .then(|| row.normalized_title.clone()),
            similarity,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_item(&record).await {
            warn!(job_id = %self.job_id, item_id = %row.row_id, error = %e, "Item insert failed; ingestion continues");
        }
    }

    async fn bump(&self, bump: CounterBump) {
        if let Err(e) = self.store.bump_counters(&self.job_id, bump).await {
            warn!(job_id = %self.job_id, error = %e, "Counter update failed; ingestion continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Engine behavior is covered end-to-end in tests/engine_test.rs with
    // recording fakes; unit tests here only cover small helpers.

    #[test]
    fn counter_bump_equality() {
        assert_eq!(CounterBump::Accepted, CounterBump::Accepted);
        assert_ne!(
            CounterBump::Rejected(RejectionReason::ExactMatch),
            CounterBump::Rejected(RejectionReason::CacheHit)
        );
    }
}
