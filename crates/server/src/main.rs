use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod auth;
mod config;
mod gateway;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState::new(storage, &settings);
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/courses/:course_id/channels",
            get(api::http_list_channels).post(api::http_create_channel),
        )
        .route("/channels/:channel_id/lock", put(api::http_lock_channel))
        .route(
            "/channels/:channel_id/messages",
            get(api::http_list_messages).post(api::http_create_message),
        )
        .route(
            "/messages/:message_id/pin",
            put(api::http_pin).delete(api::http_unpin),
        )
        .route(
            "/messages/:message_id/answer",
            put(api::http_mark_answer).delete(api::http_unmark_answer),
        )
        .route(
            "/messages/:message_id/lock",
            put(api::http_lock_thread).delete(api::http_unlock_thread),
        )
        .route("/messages/:message_id/hide", post(api::http_hide))
        .route("/messages/:message_id/restore", post(api::http_restore))
        .route("/messages/:message_id/report", post(api::http_report))
        .route("/messages/:message_id/moderation", get(api::http_moderation_log))
        .route("/ws", get(gateway::ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state
        .api
        .storage
        .health_check()
        .await
        .map(|_| "ok")
        .map_err(|error| {
            error!(%error, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
