//! API route definitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::detect::dedup::IngestOutcome;
use crate::detect::{EgressSignal, EventStatus};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/signals", post(ingest_signal))
        .route("/events/recent", get(recent_events))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/verify-false-positive", post(verify_false_positive))
        .route("/events/{id}/reprocess", post(reprocess_event))
}

fn envelope(data: Value, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    error!("{context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": context })),
    )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let queued = state.queue.queued_count().unwrap_or(-1);
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "queued_tasks": queued
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
        }
    }))
}

/// Inbound-signal path: runs the deduplicator synchronously and returns
/// quickly; remediation happens on the worker.
async fn ingest_signal(
    State(state): State<AppState>,
    Json(signal): Json<EgressSignal>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let outcome = state
        .deduplicator
        .ingest(&signal)
        .await
        .map_err(|e| internal_error("signal ingestion failed", format!("{e:#}")))?;

    let (status, body) = match outcome {
        IngestOutcome::Created(id) => (
            StatusCode::ACCEPTED,
            json!({ "outcome": "created", "event_id": id }),
        ),
        IngestOutcome::Deduplicated(id) => (
            StatusCode::OK,
            json!({ "outcome": "deduplicated", "event_id": id }),
        ),
        IngestOutcome::Skipped(reason) => (
            StatusCode::OK,
            json!({ "outcome": "skipped", "reason": reason }),
        ),
    };
    Ok((status, envelope(body, json!({}))))
}

async fn recent_events(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let events = state
        .store
        .recent(50)
        .map_err(|e| internal_error("failed to list events", format!("{e:#}")))?;
    let total = events.len();
    Ok(envelope(json!(events), json!({ "total": total })))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let event = state
        .store
        .find_by_id(id)
        .map_err(|e| internal_error("failed to load event", format!("{e:#}")))?;
    match event {
        Some(event) => Ok(envelope(json!(event), json!({}))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "event not found" })),
        )),
    }
}

/// Reviewer verdict endpoint: reclassify a pending event so it is excluded
/// from all future incident counts.
async fn verify_false_positive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let changed = state
        .store
        .mark_false_positive(id, Utc::now())
        .map_err(|e| internal_error("failed to update event", format!("{e:#}")))?;
    if changed {
        Ok(envelope(json!({ "status": EventStatus::VerifiedFalsePositive }), json!({})))
    } else {
        Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "event is not pending" })),
        ))
    }
}

/// Manual recovery path: re-enqueue a pending event whose task was
/// abandoned after its retry budget.
async fn reprocess_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let event = state
        .store
        .find_by_id(id)
        .map_err(|e| internal_error("failed to load event", format!("{e:#}")))?;
    let Some(event) = event else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "event not found" })),
        ));
    };
    if event.status.is_terminal() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "event is not pending" })),
        ));
    }
    state
        .queue
        .enqueue(id)
        .map_err(|e| internal_error("failed to enqueue task", format!("{e:#}")))?;
    Ok((
        StatusCode::ACCEPTED,
        envelope(json!({ "outcome": "enqueued", "event_id": id }), json!({})),
    ))
}
