//! Public HTTP surface: job creation, SSE streaming, history, stats.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use exa_client::{CreateWebsetRequest, WebsetEnrichment, WebsetEntity, WebsetSearch};
use websift_common::{JobStatus, StreamFrame, WebsiftError};
use websift_store::ItemFilter;

use crate::controller;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/websets", post(create_webset))
        .route("/api/websets/{id}/stream", get(stream_webset))
        .route("/api/history/websets", get(history_list))
        .route("/api/history/websets/{id}", get(history_detail))
        .route("/api/stats/overview", get(stats_overview))
        .route("/api/stats/database", get(stats_database))
        .route("/api/stats/url-resolution", get(stats_url_resolution))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// --- Job creation ---

#[derive(Debug, Deserialize)]
struct CreateWebsetBody {
    query: String,
    count: Option<u32>,
    entity: Option<String>,
    enrichments: Option<Vec<EnrichmentBody>>,
}

#[derive(Debug, Deserialize)]
struct EnrichmentBody {
    description: String,
    format: Option<String>,
}

async fn create_webset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWebsetBody>,
) -> impl IntoResponse {
    if body.query.trim().is_empty() {
        let err = WebsiftError::Validation("query is required".to_string());
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": err.to_string()})),
        )
            .into_response();
    }

    let request = CreateWebsetRequest {
        search: WebsetSearch {
            query: body.query.clone(),
            count: body.count.unwrap_or(25),
            entity: body.entity.clone().map(|entity_type| WebsetEntity { entity_type }),
        },
        enrichments: body.enrichments.map(|list| {
            list.into_iter()
                .map(|e| WebsetEnrichment {
                    description: e.description,
                    format: e.format,
                })
                .collect()
        }),
    };

    let webset = match state.exa.create_webset(&request).await {
        Ok(webset) => webset,
        Err(e) => {
            let err = WebsiftError::UpstreamFatal(e.to_string());
            error!(error = %err, "Webset creation failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    if let Err(e) = state
        .store
        .insert_job(&webset.id, &body.query, body.entity.as_deref())
        .await
    {
        // Persistence never blocks ingestion; the stream still works.
        error!(webset_id = %webset.id, error = %e, "Job insert failed");
    }

    info!(webset_id = %webset.id, query = %body.query, entity = ?body.entity, "Job created");
    controller::start_job(state, webset.id.clone(), body.entity);

    Json(json!({"websetId": webset.id})).into_response()
}

// --- Streaming ---

async fn stream_webset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    // Live job: join the bus (replay + live).
    if let Some(context) = state.job(&id) {
        let rx = context.bus.subscribe();
        let stream = ReceiverStream::new(rx).map(frame_to_event);
        return Ok(Sse::new(stream.boxed()).keep_alive(KeepAlive::default()));
    }

    // Historical job (e.g. after a restart): synthesize the replay from the
    // store, then close with the terminal frame.
    let Ok(Some(job)) = state.store.get_job(&id).await else {
        return Err(StatusCode::NOT_FOUND);
    };

    let mut frames = vec![StreamFrame::Connected {
        webset_id: id.clone(),
    }];
    if let Ok(items) = state.store.job_items(&id, ItemFilter::Accepted).await {
        for item in items {
            if let Some(raw) = item.raw_data {
                frames.push(StreamFrame::Item { item: raw });
            }
        }
    }
    frames.push(match job.status {
        JobStatus::Error => StreamFrame::Error {
            error: job
                .error_message
                .unwrap_or_else(|| "job failed".to_string()),
        },
        _ => StreamFrame::finished((job.unique_items + job.duplicates_rejected) as u64),
    });

    let stream = futures::stream::iter(frames).map(frame_to_event);
    Ok(Sse::new(stream.boxed()).keep_alive(KeepAlive::default()))
}

fn frame_to_event(frame: StreamFrame) -> Result<Event, Infallible> {
    Ok(Event::default()
        .json_data(&frame)
        .unwrap_or_else(|_| Event::default().data("{}")))
}

// --- History ---

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn history_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    match state.store.list_jobs(limit).await {
        Ok(jobs) => Json(json!({"websets": jobs})).into_response(),
        Err(e) => {
            error!(error = %e, "History query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "history unavailable"})),
            )
                .into_response()
        }
    }
}

async fn history_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match state.store.get_job(&id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown webset"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(webset_id = %id, error = %e, "Job lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "history unavailable"})),
            )
                .into_response();
        }
    };

    let accepted = state
        .store
        .job_items(&id, ItemFilter::Accepted)
        .await
        .unwrap_or_default();
    let rejected = state
        .store
        .job_items(&id, ItemFilter::Rejected)
        .await
        .unwrap_or_default();

    Json(json!({
        "webset": job,
        "acceptedItems": accepted,
        "rejectedItems": rejected,
        "rejectionReasons": job.rejection_reasons,
    }))
    .into_response()
}

// --- Stats ---

async fn stats_overview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.overview_stats().await {
        Ok(stats) => Json(json!(stats)).into_response(),
        Err(e) => {
            error!(error = %e, "Overview stats failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "stats unavailable"})),
            )
                .into_response()
        }
    }
}

async fn stats_database(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.database_stats().await {
        Ok(stats) => Json(json!(stats)).into_response(),
        Err(e) => {
            error!(error = %e, "Database stats failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "stats unavailable"})),
            )
                .into_response()
        }
    }
}

async fn stats_url_resolution(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.resolver {
        Some(resolver) => Json(json!(resolver.stats())).into_response(),
        None => Json(json!({
            "enabled": false,
            "cached": 0,
            "hits": 0,
            "misses": 0,
            "failures": 0,
        }))
        .into_response(),
    }
}
