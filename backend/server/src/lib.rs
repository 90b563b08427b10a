//! Backend for a personal portfolio site.
//!
//! Serves the public contact pipeline and the admin dashboard API.
//!
//!
//!
//! # General Infrastructure
//! - Site frontend calls the callable functions below with JSON
//! - Submissions land in the configured store (`memory` or `redis`)
//! - Notification and confirmation emails go through the retry queue, never inline
//! - Admin dashboard talks to `/api/admin/*` with a session cookie
//!
//!
//!
//! # Routes
//!
//! ## Public
//! - `POST /api/contact`: validate, store, queue emails
//! - `POST /api/feedback`: rating 1-5 with an optional message
//! - `POST /api/projects/{slug}/views`: increment and return a project's view counter
//! - `GET /health`
//!
//! ## Admin
//! - `POST|DELETE /api/admin/session`: sign in with the API key, sign out
//! - `GET /api/admin/submissions`: paged list, filters and optional search
//! - `GET|PATCH|DELETE /api/admin/submissions/{id}`
//! - `POST /api/admin/submissions/bulk-status`
//! - `GET /api/admin/stats`
//! - `GET /api/admin/email-queue`, `POST /api/admin/email-queue/retry`,
//!   `DELETE /api/admin/email-queue/sent`
//!
//!
//!
//! # Notes
//!
//! ## Email Is Not The Source Of Truth
//! A submission is accepted once the store write succeeds. Email failures are retried by the queue
//! with backoff and surface only in the admin queue stats.
//!
//! ## Setup
//!
//! Run against local Redis.
//! ```sh
//! STORE_BACKEND=redis ADMIN_API_KEY=dev RUST_LOG=info cargo run --bin folio-server
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{CONTENT_TYPE, COOKIE},
    },
    routing::{delete, get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal, sync::watch};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admin;
pub mod config;
pub mod error;
pub mod mailer;
pub mod queue;
pub mod routes;
pub mod search;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;

use admin::{
    bulk_status_handler, clear_sent_handler, delete_handler, get_handler, list_handler,
    login_handler, logout_handler, queue_handler, retry_handler, stats_handler, update_handler,
};
use config::Config;
use routes::{contact_handler, feedback_handler, health_handler, project_views_handler};
use state::AppState;

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = state.queue.spawn_worker(shutdown_rx);

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");

    if shutdown_tx.send(true).is_err() {
        warn!("Email worker already stopped");
    }
    worker.await?;

    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin}");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, COOKIE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/contact", post(contact_handler))
        .route("/api/feedback", post(feedback_handler))
        .route("/api/projects/{slug}/views", post(project_views_handler))
        .route(
            "/api/admin/session",
            post(login_handler).delete(logout_handler),
        )
        .route("/api/admin/submissions", get(list_handler))
        .route(
            "/api/admin/submissions/bulk-status",
            post(bulk_status_handler),
        )
        .route(
            "/api/admin/submissions/{id}",
            get(get_handler)
                .patch(update_handler)
                .delete(delete_handler),
        )
        .route("/api/admin/stats", get(stats_handler))
        .route("/api/admin/email-queue", get(queue_handler))
        .route("/api/admin/email-queue/retry", post(retry_handler))
        .route("/api/admin/email-queue/sent", delete(clear_sent_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
