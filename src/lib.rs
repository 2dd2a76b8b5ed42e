//! Redesign Server - HTTP backend for AI-assisted room redesign
//!
//! This crate provides the backend for a room-redesign web app. It supports:
//!
//! - **Chat**: Text chat and image-editing chat backed by Gemini, with
//!   streamed image generation persisted to a public directory
//! - **Suggestions**: Claude-backed redesign suggestions with fixed
//!   per-endpoint cardinality (five plain items, or three titled ones)
//! - **Uploads**: Canonical JPEG normalization for every uploaded photo,
//!   including HEIC conversion via external tools and a byte-ceiling
//!   re-encode for providers with payload limits
//! - **Accounts & Quota**: Anonymous visitors get a cookie-tracked quota of
//!   free redesigns; registration folds their history into the new account
//! - **Downloads**: Single-use, time-limited download tokens for results
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use redesign_ai::AppConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     redesign_ai::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /healthz` - Liveness probe
//! - `POST /api/chat` - Text chat
//! - `POST /api/chat-with-image` - Image-editing chat (multipart)
//! - `POST /api/claude-suggestions` - Five redesign suggestions (quota gated)
//! - `POST /api/claude-compare` - Three titled suggestions (quota gated)
//! - `GET /api/test-claude` - Upstream connectivity probe
//! - `POST /api/save-results` - Prepare a result for download
//! - `GET /api/download/{download_id}` - Claim a single-use download
//! - `GET /generated/{filename}` - Serve a generated image
//! - `GET /api/usage/count` - Remaining anonymous quota
//! - `POST /auth/register`, `POST /auth/login`, `POST /auth/logout`,
//!   `POST /auth/refresh`, `GET /auth/user`, `GET /auth/check-anonymous` -
//!   Account management

pub mod config;
pub mod error;
pub mod identity;
pub mod imaging;
pub mod interpret;
pub mod middleware;
pub mod providers;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;
pub mod usage;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, start_server};
pub use state::AppState;
