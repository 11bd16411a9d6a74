//! Ingestion controller: drives the lifecycle of one job from webset
//! creation to the terminal `finished` or `error` frame.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{info, warn};

use websift_common::{DedupMode, JobStatus, StreamFrame};
use websift_dedup::{DedupEngine, EngineDeps};

use crate::state::{AppState, JobContext};

/// Upstream status poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Wall-clock budget for one job's polling loop.
const POLL_BUDGET: Duration = Duration::from_secs(50 * 60);
/// Items per cursor page.
const PAGE_LIMIT: u32 = 100;
/// Concurrent ingests per page in company mode.
const COMPANY_CONCURRENCY: usize = 8;

/// Create the in-memory context for a job and start its polling loop.
pub fn start_job(state: Arc<AppState>, webset_id: String, entity_type: Option<String>) {
    let mode = DedupMode::from_entity(entity_type.as_deref());
    let bus = Arc::new(crate::bus::JobBus::new(webset_id.clone()));

    let engine = DedupEngine::new(
        webset_id.clone(),
        mode,
        !state.config.enable_dedup,
        EngineDeps {
            sink: bus.clone(),
            store: state.store.clone(),
            vector: state.vector.clone(),
            llm: state.llm.clone(),
            llm_gate: state.llm_gate.clone(),
            resolver: if mode == DedupMode::Company {
                state.resolver.clone()
            } else {
                None
            },
        },
    );

    let context = Arc::new(JobContext {
        job_id: webset_id.clone(),
        bus,
        engine,
    });
    state.register_job(context.clone());

    tokio::spawn(async move {
        run_job(state, context, mode).await;
    });
}

async fn run_job(state: Arc<AppState>, context: Arc<JobContext>, mode: DedupMode) {
    let webset_id = context.job_id.clone();
    let started = Instant::now();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_status = String::new();

    info!(webset_id = %webset_id, ?mode, "Job polling loop starting");
    if let Err(e) = state
        .store
        .set_job_status(&webset_id, JobStatus::Processing)
        .await
    {
        warn!(webset_id = %webset_id, error = %e, "Status update failed");
    }

    loop {
        if started.elapsed() > POLL_BUDGET {
            warn!(webset_id = %webset_id, "Poll budget exhausted; finishing job");
            break;
        }

        let idle = match state.exa.get_webset(&webset_id).await {
            Ok(webset) => {
                if webset.status != last_status {
                    context.bus.broadcast(StreamFrame::Status {
                        status: webset.status.clone(),
                        item_count: None,
                    });
                    last_status = webset.status.clone();
                }
                webset.is_idle()
            }
            Err(exa_client::ExaError::Api { status, message })
                if matches!(status, 401 | 403 | 404) =>
            {
                // The webset is gone or we lost access: nothing further can
                // arrive on this stream.
                let error = format!("Upstream rejected webset ({status}): {message}");
                warn!(webset_id = %webset_id, %error, "Job failed");
                context
                    .bus
                    .broadcast(StreamFrame::Error { error: error.clone() });
                if let Err(e) = state.store.fail_job(&webset_id, &error).await {
                    warn!(webset_id = %webset_id, error = %e, "Failed to mark job errored");
                }
                return;
            }
            Err(e) => {
                // Transient: skip this tick, retry on the next one.
                warn!(webset_id = %webset_id, error = %e, "Status poll failed");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        fetch_new_items(&state, &context, mode, &mut seen).await;

        if idle {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    // Give every pending item its terminal frame before accounting.
    context.engine.drain().await;

    let (processed, rejected) = context.bus.totals();
    context
        .bus
        .broadcast(StreamFrame::finished(processed + rejected));

    if let Err(e) = state.store.complete_job(&webset_id).await {
        warn!(webset_id = %webset_id, error = %e, "Failed to mark job completed");
    }

    info!(
        webset_id = %webset_id,
        processed,
        rejected,
        elapsed_secs = started.elapsed().as_secs(),
        "Job finished"
    );
}

/// One pass over the cursor-paginated item listing. New items (ids not yet
/// seen this job) are fed to the engine; a page fetch error stops pagination
/// for this tick and is retried on the next.
async fn fetch_new_items(
    state: &Arc<AppState>,
    context: &Arc<JobContext>,
    mode: DedupMode,
    seen: &mut HashSet<String>,
) {
    let webset_id = &context.job_id;
    let mut cursor: Option<String> = None;

    loop {
        let page = match state
            .exa
            .list_items(webset_id, cursor.as_deref(), PAGE_LIMIT)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(webset_id = %webset_id, error = %e, "Item page fetch failed; retrying next tick");
                return;
            }
        };

        let fresh: Vec<Value> = page
            .data
            .into_iter()
            .filter(|item| match exa_client::item_id(item) {
                Some(id) => seen.insert(id.to_string()),
                // Id-less items cannot be tracked here; the engine's own
                // processed-id set is the backstop.
                None => true,
            })
            .collect();

        if !fresh.is_empty() {
            if let Err(e) = state
                .store
                .set_job_status(webset_id, JobStatus::ProcessingItems)
                .await
            {
                warn!(webset_id = %webset_id, error = %e, "Status update failed");
            }
            context.bus.broadcast(StreamFrame::Status {
                status: JobStatus::ProcessingItems.to_string(),
                item_count: Some(fresh.len() as u64),
            });

            match mode {
                DedupMode::Entity => {
                    for item in fresh {
                        context.engine.ingest(item).await;
                    }
                }
                DedupMode::Company => {
                    stream::iter(fresh)
                        .for_each_concurrent(COMPANY_CONCURRENCY, |item| {
                            let engine = context.engine.clone();
                            async move { engine.ingest(item).await }
                        })
                        .await;
                }
            }

            if let Err(e) = state
                .store
                .set_job_status(webset_id, JobStatus::Processing)
                .await
            {
                warn!(webset_id = %webset_id, error = %e, "Status update failed");
            }
            context.bus.broadcast(StreamFrame::Status {
                status: JobStatus::Processing.to_string(),
                item_count: None,
            });
        }

        match page.next_cursor {
            Some(next) if page.has_more => {
                if let Err(e) = state.store.set_next_cursor(webset_id, Some(&next)).await {
                    warn!(webset_id = %webset_id, error = %e, "Cursor update failed");
                }
                cursor = Some(next);
            }
            _ => return,
        }
    }
}
