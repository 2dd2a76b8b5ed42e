//! Redesign Server - HTTP backend for AI-assisted room redesign
//!
//! This binary loads configuration from the environment (and an optional
//! `redesign.toml`) and serves the API until shutdown.

use redesign_ai::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up a local .env in development
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    redesign_ai::start_server(config).await?;

    Ok(())
}
