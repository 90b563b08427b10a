//! Admin dashboard endpoints. Everything except login requires an [`AdminSession`].
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse},
};
use contact::{
    BulkStatusRequest, CallableResponse, ListQuery, Page, QueueStats, SessionRequest,
    StatusCounts, Submission, SubmissionPatch,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    routes::{Params, PathParam, Payload},
    session::{AdminSession, api_key_matches, cleared_cookie, new_token, session_cookie},
    state::AppState,
};

pub const MAX_BULK_IDS: usize = 100;

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Payload(request): Payload<SessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !api_key_matches(&request.api_key, &state.config.admin_api_key) {
        warn!("Rejected admin login with an invalid API key");
        return Err(AppError::PermissionDenied);
    }

    let token = new_token();
    state
        .sessions
        .insert(&token, state.config.session_ttl)
        .await?;

    info!("Admin session started");

    Ok((
        AppendHeaders([(
            SET_COOKIE,
            session_cookie(&token, state.config.session_ttl, state.config.cookie_secure),
        )]),
        Json(CallableResponse::ok("Signed in", None)),
    ))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    session: AdminSession,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.remove(&session.token).await?;

    Ok((
        AppendHeaders([(SET_COOKIE, cleared_cookie(state.config.cookie_secure))]),
        Json(CallableResponse::ok("Signed out", None)),
    ))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Params(query): Params<ListQuery>,
) -> Result<Json<Page<Submission>>, AppError> {
    let query = query.sanitized();

    if query.search.is_none() {
        return Ok(Json(state.store.list(&query).await?));
    }

    match &state.search {
        Some(search) => Ok(Json(search.search(&query).await?)),
        None => Err(AppError::FailedPrecondition(
            "Search is not supported by the configured backend".to_string(),
        )),
    }
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<Submission>, AppError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Submission {id}")))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    PathParam(id): PathParam<Uuid>,
    Payload(patch): Payload<SubmissionPatch>,
) -> Result<Json<Submission>, AppError> {
    let patch = patch.normalize().map_err(AppError::InvalidArgument)?;

    if patch.is_empty() {
        return Err(AppError::InvalidArgument("No fields to update".to_string()));
    }

    let submission = state
        .store
        .update(id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Submission {id}")))?;

    if let Some(search) = &state.search {
        search.upsert(&submission).await;
    }

    info!("Updated submission {id}");

    Ok(Json(submission))
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    PathParam(id): PathParam<Uuid>,
) -> Result<Json<CallableResponse>, AppError> {
    if !state.store.delete(id).await? {
        return Err(AppError::NotFound(format!("Submission {id}")));
    }

    if let Some(search) = &state.search {
        search.remove(id).await;
    }

    info!("Deleted submission {id}");

    Ok(Json(CallableResponse::ok(
        "Submission deleted",
        Some(id.to_string()),
    )))
}

pub async fn bulk_status_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
    Payload(request): Payload<BulkStatusRequest>,
) -> Result<Json<CallableResponse>, AppError> {
    if request.ids.is_empty() || request.ids.len() > MAX_BULK_IDS {
        return Err(AppError::InvalidArgument(format!(
            "Between 1 and {MAX_BULK_IDS} ids are required"
        )));
    }

    let patch = SubmissionPatch {
        status: Some(request.status),
        ..Default::default()
    };

    let mut updated = 0;
    for id in &request.ids {
        if let Some(submission) = state.store.update(*id, &patch).await? {
            if let Some(search) = &state.search {
                search.upsert(&submission).await;
            }
            updated += 1;
        }
    }

    info!("Bulk status {}: {updated}/{}", request.status, request.ids.len());

    Ok(Json(CallableResponse::ok(
        format!("Updated {updated} submissions"),
        None,
    )))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Result<Json<StatusCounts>, AppError> {
    Ok(Json(state.store.count_by_status().await?))
}

pub async fn queue_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<QueueStats> {
    Json(state.queue.stats().await)
}

pub async fn retry_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<CallableResponse> {
    let retried = state.queue.retry_failed().await;

    Json(CallableResponse::ok(
        format!("Requeued {retried} failed emails"),
        None,
    ))
}

pub async fn clear_sent_handler(
    State(state): State<Arc<AppState>>,
    _session: AdminSession,
) -> Json<CallableResponse> {
    let removed = state.queue.clear_sent().await;

    Json(CallableResponse::ok(
        format!("Cleared {removed} sent emails"),
        None,
    ))
}
