//! Public callable functions.
//!
//! Each takes JSON and answers with [`CallableResponse`] or an [`contact::ErrorBody`].
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use contact::{CallableResponse, ContactForm, FeedbackForm, ProjectViews};
use tracing::info;

use crate::{
    error::AppError,
    mailer::{feedback_notification, owner_notification, submitter_confirmation},
    queue::{CONFIRMATION_PRIORITY, FEEDBACK_PRIORITY, OWNER_NOTIFICATION_PRIORITY},
    state::AppState,
    store::{Feedback, NewSubmission},
    utils::{is_valid_slug, provenance},
};

pub const CONTACT_SOURCE: &str = "contact_form";
pub const FEEDBACK_SOURCE: &str = "feedback_form";

/// JSON body whose rejections come back as `invalid-argument`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct Payload<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct Params<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct PathParam<T>(pub T);

pub async fn health_handler() -> &'static str {
    "ok"
}

pub async fn contact_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Payload(form): Payload<ContactForm>,
) -> Result<impl IntoResponse, AppError> {
    form.validate().map_err(AppError::Validation)?;

    let submission = state
        .store
        .create(NewSubmission {
            form,
            provenance: provenance(&headers, CONTACT_SOURCE),
        })
        .await?;

    info!("New contact submission {}", submission.id);

    if let Some(search) = &state.search {
        search.upsert(&submission).await;
    }

    state
        .queue
        .enqueue(
            owner_notification(&submission, &state.config.mail_to),
            OWNER_NOTIFICATION_PRIORITY,
        )
        .await;
    state
        .queue
        .enqueue(submitter_confirmation(&submission), CONFIRMATION_PRIORITY)
        .await;

    Ok((
        StatusCode::CREATED,
        Json(CallableResponse::ok(
            "Thank you for your message! I'll get back to you soon.",
            Some(submission.id.to_string()),
        )),
    ))
}

pub async fn project_views_handler(
    State(state): State<Arc<AppState>>,
    PathParam(slug): PathParam<String>,
) -> Result<Json<ProjectViews>, AppError> {
    if !is_valid_slug(&slug) {
        return Err(AppError::InvalidArgument(format!("Invalid project slug `{slug}`")));
    }

    let views = state.store.increment_project_views(&slug).await?;

    Ok(Json(ProjectViews { slug, views }))
}

pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Payload(form): Payload<FeedbackForm>,
) -> Result<impl IntoResponse, AppError> {
    form.validate().map_err(AppError::Validation)?;

    let notification = feedback_notification(&form, &state.config.mail_to);
    let feedback = Feedback::new(form, provenance(&headers, FEEDBACK_SOURCE));
    let id = feedback.id;

    state.store.record_feedback(feedback).await?;
    state.queue.enqueue(notification, FEEDBACK_PRIORITY).await;

    info!("New feedback {id}");

    Ok((
        StatusCode::CREATED,
        Json(CallableResponse::ok(
            "Thanks for the feedback!",
            Some(id.to_string()),
        )),
    ))
}
