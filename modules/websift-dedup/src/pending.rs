//! Items awaiting an LLM verdict, and the decisions queued for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::Notify;

use crate::canonical::{host_of, CanonicalRow};

// --- Decisions ---

/// A candidate reference carried inside a decision prompt.
#[derive(Debug, Clone)]
pub struct CandidateRef {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A company candidate additionally carries its domain identity.
#[derive(Debug, Clone)]
pub struct CompanyCandidateRef {
    pub id: String,
    pub name: String,
    pub url: String,
    pub brand: String,
    pub etld1: String,
}

/// One staged adjudication. The tag decides the prompt shape and how the
/// verdict maps back to an accept or drop.
#[derive(Debug, Clone)]
pub enum PendingDecision {
    /// Legacy pair form: one new item against one accepted item. Used for
    /// video-platform ambiguity, which skips the candidate-pool scorer.
    Pair {
        job_id: String,
        id_a: String,
        name_a: String,
        url_a: String,
        id_b: String,
        name_b: String,
        url_b: String,
        raw_a: Value,
    },
    Entity {
        job_id: String,
        id_new: String,
        name_new: String,
        url_new: String,
        candidates: Vec<CandidateRef>,
        raw_new: Value,
    },
    Company {
        job_id: String,
        id_new: String,
        name_new: String,
        url_new: String,
        brand_new: String,
        etld1_new: String,
        candidates: Vec<CompanyCandidateRef>,
        raw_new: Value,
    },
}

impl PendingDecision {
    /// The row id of the new item under adjudication (equals the tmpId).
    pub fn new_id(&self) -> &str {
        match self {
            PendingDecision::Pair { id_a, .. } => id_a,
            PendingDecision::Entity { id_new, .. } => id_new,
            PendingDecision::Company { id_new, .. } => id_new,
        }
    }

    /// Row id of the strongest existing candidate, if any.
    pub fn best_candidate_id(&self) -> Option<&str> {
        match self {
            PendingDecision::Pair { id_b, .. } => Some(id_b),
            PendingDecision::Entity { candidates, .. } => {
                candidates.first().map(|c| c.id.as_str())
            }
            PendingDecision::Company { candidates, .. } => {
                candidates.first().map(|c| c.id.as_str())
            }
        }
    }

    /// Sorted host pair used as the LLM cache key, when both sides have one.
    pub fn host_pair(&self) -> Option<(String, String)> {
        let (url_new, url_existing) = match self {
            PendingDecision::Pair { url_a, url_b, .. } => (url_a.as_str(), url_b.as_str()),
            PendingDecision::Entity {
                url_new,
                candidates,
                ..
            } => (url_new.as_str(), candidates.first()?.url.as_str()),
            PendingDecision::Company {
                url_new,
                candidates,
                ..
            } => (url_new.as_str(), candidates.first()?.url.as_str()),
        };
        sorted_host_pair(host_of(url_new), host_of(url_existing))
    }
}

/// Order two hosts so the pair keys the cache independent of direction.
/// Same-host pairs (common on video platforms) carry no key: one verdict
/// there must not decide every later pair on that host.
pub fn sorted_host_pair(a: String, b: String) -> Option<(String, String)> {
    if a.is_empty() || b.is_empty() || a == b {
        return None;
    }
    if a < b {
        Some((a, b))
    } else {
        Some((b, a))
    }
}

// --- Registry ---

struct PendingEntry {
    row: CanonicalRow,
}

/// Tracks items between their `pending` frame and the terminal
/// `confirm`/`drop`. Every registered item is settled exactly once;
/// `wait_idle` returns only after all settlements, including their emitted
/// frames, are complete.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
    outstanding: AtomicUsize,
    idle: Notify,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tmp_id: &str, row: CanonicalRow) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .expect("pending lock poisoned")
            .insert(tmp_id.to_string(), PendingEntry { row });
    }

    /// Claim a pending item for resolution. Returns None if it was already
    /// claimed, making double verdicts harmless.
    pub fn take(&self, tmp_id: &str) -> Option<CanonicalRow> {
        self.entries
            .lock()
            .expect("pending lock poisoned")
            .remove(tmp_id)
            .map(|e| e.row)
    }

    /// Mark one claimed item fully settled (frames emitted, counters bumped).
    pub fn settle(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every registered item has been settled.
    pub async fn wait_idle(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before re-checking, so a settle landing
            // between the check and the await still wakes us.
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use serde_json::json;
    use websift_common::DedupMode;

    #[test]
    fn take_is_exactly_once() {
        let reg = PendingRegistry::new();
        let row = canonicalize(&json!({"id": "x"}), DedupMode::Company);
        reg.register("x", row);
        assert!(reg.take("x").is_some());
        assert!(reg.take("x").is_none());
        reg.settle();
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn wait_idle_returns_after_settle() {
        let reg = std::sync::Arc::new(PendingRegistry::new());
        let row = canonicalize(&json!({"id": "x"}), DedupMode::Company);
        reg.register("x", row);

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.wait_idle().await })
        };

        reg.take("x");
        reg.settle();
        waiter.await.unwrap();
    }

    #[test]
    fn host_pair_is_sorted() {
        let d = PendingDecision::Pair {
            job_id: "j".into(),
            id_a: "a".into(),
            name_a: "JD".into(),
            url_a: "https://jd.hk".into(),
            id_b: "b".into(),
            name_b: "JD".into(),
            url_b: "https://jd.com".into(),
            raw_a: json!({}),
        };
        assert_eq!(
            d.host_pair(),
            Some(("jd.com".to_string(), "jd.hk".to_string()))
        );
    }

    #[test]
    fn host_pair_none_without_urls() {
        let d = PendingDecision::Entity {
            job_id: "j".into(),
            id_new: "a".into(),
            name_new: "X".into(),
            url_new: String::new(),
            candidates: vec![],
            raw_new: json!({}),
        };
        assert_eq!(d.host_pair(), None);
    }
}
