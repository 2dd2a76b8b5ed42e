//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Router configuration with all API endpoints
//! - Middleware stack (logging, compression, CORS)
//! - Graceful shutdown handling

use crate::config::AppConfig;
use crate::middleware::{log_requests, request_id};
use crate::routes::{auth, chat, files, health, not_found, suggestions, usage};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{any, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Everything is public: anonymous callers are identified by cookie and
/// gated per endpoint by the usage quota, not by a blanket auth layer.
/// Unmatched paths fall through to the static frontend directory.
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    // Generous outer timeout: image generation streams can legitimately run
    // for minutes across retries.
    let timeout = Duration::from_secs(state.config.gemini_timeout_secs * 3);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/refresh", post(auth::refresh))
        .route("/user", get(auth::get_user))
        .route("/check-anonymous", get(auth::check_anonymous));

    let api_routes = Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/chat-with-image", post(chat::chat_with_image))
        .route("/api/claude-suggestions", post(suggestions::claude_suggestions))
        .route("/api/claude-compare", post(suggestions::claude_compare))
        .route("/api/test-claude", get(suggestions::test_claude))
        .route("/api/save-results", post(files::save_results))
        .route("/api/download/{download_id}", get(files::download))
        .route("/api/usage/count", get(usage::usage_count))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes() * 2));

    let static_files =
        ServeDir::new(&state.config.public_dir).not_found_service(any(not_found));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/generated/{filename}", get(files::serve_generated))
        .merge(api_routes)
        .nest("/auth", auth_routes)
        .fallback_service(static_files)
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the redesign HTTP server
///
/// Initializes logging and shared state, binds the configured TCP address
/// and serves until SIGTERM or Ctrl+C.
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .json()
        .init();

    let addr: SocketAddr = config.socket_addr()?;
    let state = AppState::new(config.clone())?;
    let app = build_router(state);

    tracing::info!("Starting redesign server on {}", addr);
    tracing::info!(
        "Anonymous quota: {}, max upload: {}MB",
        config.anonymous_quota,
        config.max_upload_mb
    );
    tracing::info!(
        "Models: text={}, image={}, suggestions={}",
        config.gemini_text_model,
        config.gemini_image_model,
        config.claude_model
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
