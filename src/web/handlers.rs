//! HTTP request handlers.

use super::AppState;
use crate::db::{TargetDraft, TargetId};
use crate::registry::RegistryError;
use crate::scheduler::render_text;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

fn registry_error(e: RegistryError) -> Response {
    match &e {
        RegistryError::Invalid(v) => (StatusCode::BAD_REQUEST, v.to_string()).into_response(),
        RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        RegistryError::Store(_) => {
            tracing::error!("API: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let scheduled = state.scheduler.scheduled_count().await;
    Json(json!({
        "status": "ok",
        "scheduled_targets": scheduled,
        "failure_log_capacity": state.failure_log.capacity(),
    }))
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(draft): Json<TargetDraft>,
) -> Response {
    match state.registry.add(draft).await {
        Ok(target) => (StatusCode::CREATED, Json(target)).into_response(),
        Err(e) => registry_error(e),
    }
}

/// A target with its live monitoring state.
pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
) -> Response {
    let Some(target) = state.registry.get(id).await else {
        return registry_error(RegistryError::NotFound(id));
    };

    let scheduled = state.scheduler.is_scheduled(id).await;
    Json(json!({
        "target": target,
        "scheduled": scheduled,
        "consecutive_failures": state.scheduler.consecutive_failures(id),
        "status": state.scheduler.latest_status(id),
    }))
    .into_response()
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
    Json(draft): Json<TargetDraft>,
) -> Response {
    match state.registry.update(id, draft).await {
        Ok(target) => Json(target).into_response(),
        Err(e) => registry_error(e),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
) -> Response {
    match state.registry.remove(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => registry_error(e),
    }
}

// ============================================================================
// API: Status and failures
// ============================================================================

pub async fn handle_get_statuses(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.statuses())
}

pub async fn handle_get_failures(State(state): State<AppState>) -> Response {
    match state.failure_log.read().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_clear_failures(State(state): State<AppState>) -> Response {
    match state.failure_log.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_failures_text(State(state): State<AppState>) -> Response {
    match state.failure_log.read().await {
        Ok(entries) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_text(&entries),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
