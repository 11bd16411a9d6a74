//! Batched LLM adjudication of ambiguous dedup decisions.
//!
//! Decisions stage into a per-job queue that flushes on size or on a
//! single-shot timer, whichever comes first. At most one LLM request is in
//! flight process-wide; the gate semaphore is shared across jobs. Transport
//! or parse failures default every verdict in the batch to unique, so the
//! adjudicator can only ever suppress items when the model explicitly says
//! duplicate.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ai_client::JsonCompleter;
use websift_common::DedupMode;

use crate::pending::PendingDecision;

/// Max decisions per LLM request.
pub const LLM_BATCH: usize = 25;
/// Max staging latency before a partial batch flushes.
pub const LLM_LAT_MS: u64 = 300;

struct Staged {
    decision: PendingDecision,
    verdict_tx: oneshot::Sender<bool>,
}

#[derive(Default)]
struct BatchQueue {
    staged: Vec<Staged>,
    timer: Option<JoinHandle<()>>,
}

struct AdjInner {
    mode: DedupMode,
    transport: Option<Arc<dyn JsonCompleter>>,
    gate: Arc<Semaphore>,
    queue: Mutex<BatchQueue>,
}

/// Handle to one job's adjudication queue. Cheap to clone.
#[derive(Clone)]
pub struct Adjudicator {
    inner: Arc<AdjInner>,
}

impl Adjudicator {
    pub fn new(
        mode: DedupMode,
        transport: Option<Arc<dyn JsonCompleter>>,
        gate: Arc<Semaphore>,
    ) -> Self {
        if transport.is_none() {
            warn!("No LLM transport configured; all ambiguous items will be accepted");
        }
        Self {
            inner: Arc::new(AdjInner {
                mode,
                transport,
                gate,
                queue: Mutex::new(BatchQueue::default()),
            }),
        }
    }

    /// Stage a decision. The verdict arrives on the returned channel:
    /// `true` means duplicate.
    pub fn enqueue(&self, decision: PendingDecision) -> oneshot::Receiver<bool> {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        let mut queue = self.inner.queue.lock().expect("llm queue lock poisoned");
        queue.staged.push(Staged {
            decision,
            verdict_tx,
        });

        if queue.staged.len() >= LLM_BATCH {
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
            let this = self.clone();
            tokio::spawn(async move { this.flush().await });
        } else if queue.timer.is_none() {
            let this = self.clone();
            queue.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(LLM_LAT_MS)).await;
                // Clear our own handle before flushing so the flush cannot
                // abort the task it is running on.
                this.inner
                    .queue
                    .lock()
                    .expect("llm queue lock poisoned")
                    .timer = None;
                this.flush().await;
            }));
        }
        verdict_rx
    }

    /// Flush everything currently staged, in request-sized chunks.
    pub async fn flush(&self) {
        loop {
            let batch: Vec<Staged> = {
                let mut queue = self.inner.queue.lock().expect("llm queue lock poisoned");
                if queue.staged.is_empty() {
                    return;
                }
                if let Some(timer) = queue.timer.take() {
                    timer.abort();
                }
                let take = queue.staged.len().min(LLM_BATCH);
                queue.staged.drain(..take).collect()
            };

            let verdicts = self.adjudicate(&batch).await;
            for (staged, verdict) in batch.into_iter().zip(verdicts) {
                // Receiver gone means the job was torn down; nothing to do.
                let _ = staged.verdict_tx.send(verdict);
            }
        }
    }

    async fn adjudicate(&self, batch: &[Staged]) -> Vec<bool> {
        let Some(transport) = &self.inner.transport else {
            return vec![false; batch.len()];
        };

        let decisions: Vec<&PendingDecision> = batch.iter().map(|s| &s.decision).collect();
        let (system, user) = match self.inner.mode {
            DedupMode::Entity => (ENTITY_SYSTEM_PROMPT, build_entity_prompt(&decisions)),
            DedupMode::Company => (COMPANY_SYSTEM_PROMPT, build_company_prompt(&decisions)),
        };

        let _permit = self
            .inner
            .gate
            .acquire()
            .await
            .expect("llm gate semaphore closed");

        debug!(batch = batch.len(), "LLM adjudication request");
        let response = match transport.complete_json(system, &user).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "LLM call failed; defaulting batch to unique");
                return vec![false; batch.len()];
            }
        };

        parse_verdicts(&response, batch.len())
    }
}

/// Extract the aligned verdict array from the model's JSON. Each verdict is
/// a bare boolean or a one-element array holding one. Anything missing or
/// malformed is unique.
fn parse_verdicts(response: &str, expected: usize) -> Vec<bool> {
    let parsed: Value = match serde_json::from_str(response) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "LLM returned invalid JSON; defaulting batch to unique");
            return vec![false; expected];
        }
    };

    let arr = parsed
        .get("decisions")
        .or_else(|| parsed.get("pairs"))
        .and_then(|v| v.as_array());

    let Some(arr) = arr else {
        warn!("LLM JSON missing decisions/pairs array; defaulting batch to unique");
        return vec![false; expected];
    };

    (0..expected)
        .map(|i| match arr.get(i) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Array(inner)) => inner.first().and_then(|v| v.as_bool()).unwrap_or(false),
            _ => false,
        })
        .collect()
}

// --- Prompts ---

const ENTITY_SYSTEM_PROMPT: &str = r##"You are deduplicating entities (movies, shows, books, videos) found by a web search.

For each numbered NEW ENTITY below, decide whether it is the same underlying work as ANY of its listed candidates.

## Key Rules

- Same title with different years or year annotations → DUPLICATE
- Same title with format markers ("(TV Series)", "Movie", "Film") → DUPLICATE
- Remastered / Director's Cut / Extended editions of the same work → DUPLICATE
- The same work on different websites → DUPLICATE
- Same series but DIFFERENT seasons or episodes → NOT duplicates
- Sequels and numbered installments ("Part Two", "#2") → NOT duplicates
- Different works that merely share a franchise name → NOT duplicates
- A trailer and a second trailer of the same film are different videos → NOT duplicates

## Output Format

Return JSON: {"decisions": [bool, ...]} with exactly one boolean per
numbered entity, in order. true = duplicate of a candidate, false = unique."##;

const COMPANY_SYSTEM_PROMPT: &str = r#"You are deduplicating companies found by a web search.

For each numbered NEW COMPANY below, decide whether it is the same business as ANY of its listed candidates.

## Key Rules

- The same company on regional domains (acme.com / acme.co.uk / acme.de) → DUPLICATE
- A company's corporate, careers, or investor site vs its main site → DUPLICATE
- A rebrand or legal-name variant of the same business → DUPLICATE
- A subsidiary with its own product, brand, and site → NOT duplicates
- Different companies that share a short name or acronym → NOT duplicates
- A marketplace listing about a company vs the company itself → NOT duplicates

## Output Format

Return JSON: {"pairs": [bool, ...]} with exactly one boolean per numbered
company, in order. true = duplicate of a candidate, false = unique."#;

fn build_entity_prompt(decisions: &[&PendingDecision]) -> String {
    let mut out = String::from("Decide each new entity:\n");
    for (i, decision) in decisions.iter().enumerate() {
        match decision {
            PendingDecision::Entity {
                name_new,
                url_new,
                candidates,
                ..
            } => {
                let _ = writeln!(out, "\n{}. NEW ENTITY: \"{}\" ({})", i + 1, name_new, url_new);
                let _ = writeln!(out, "   Candidates:");
                for c in candidates {
                    let _ = writeln!(out, "   - \"{}\" ({})", c.name, c.url);
                }
            }
            PendingDecision::Pair {
                name_a,
                url_a,
                name_b,
                url_b,
                ..
            } => {
                let _ = writeln!(out, "\n{}. NEW ENTITY: \"{}\" ({})", i + 1, name_a, url_a);
                let _ = writeln!(out, "   Candidates:");
                let _ = writeln!(out, "   - \"{}\" ({})", name_b, url_b);
            }
            PendingDecision::Company { .. } => {
                // Company decisions never stage into an entity-mode queue.
                let _ = writeln!(out, "\n{}. NEW ENTITY: (invalid decision)", i + 1);
            }
        }
    }
    out
}

fn build_company_prompt(decisions: &[&PendingDecision]) -> String {
    let mut out = String::from("Decide each new company:\n");
    for (i, decision) in decisions.iter().enumerate() {
        match decision {
            PendingDecision::Company {
                name_new,
                url_new,
                brand_new,
                etld1_new,
                candidates,
                ..
            } => {
                let _ = writeln!(
                    out,
                    "\n{}. NEW COMPANY: \"{}\" ({}) [brand: {}, domain: {}]",
                    i + 1,
                    name_new,
                    url_new,
                    brand_new,
                    etld1_new
                );
                let _ = writeln!(out, "   Candidates:");
                for c in candidates {
                    let _ = writeln!(
                        out,
                        "   - \"{}\" ({}) [brand: {}, domain: {}]",
                        c.name, c.url, c.brand, c.etld1
                    );
                }
            }
            PendingDecision::Pair {
                name_a,
                url_a,
                name_b,
                url_b,
                ..
            } => {
                let _ = writeln!(out, "\n{}. NEW COMPANY: \"{}\" ({})", i + 1, name_a, url_a);
                let _ = writeln!(out, "   Candidates:");
                let _ = writeln!(out, "   - \"{}\" ({})", name_b, url_b);
            }
            PendingDecision::Entity { .. } => {
                let _ = writeln!(out, "\n{}. NEW COMPANY: (invalid decision)", i + 1);
            }
        }
    }
    out
}
