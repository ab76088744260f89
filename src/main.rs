//! KapamTalk · Lesson progress backend
//!
//! - Axum HTTP + WebSocket API
//! - Per-account lesson progress kept in step between a local cache and a
//!   remote document store
//! - Written activity quizzes with a pass mark per activity
//! - Optional pronunciation scoring for the exam (via environment variables)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   KAPAMTALK_CONFIG_PATH : path to TOML config (timings, scoring, lessons, catalog bank)
//!   SCORING_BASE_URL      : enables pronunciation scoring if present
//!   CACHE_PATH            : JSON file for the local cache (in-memory if absent)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod seeds;
mod error;
mod store;
mod cache;
mod catalog;
mod tracker;
mod publisher;
mod sync;
mod scoring;
mod exam;
mod activity;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "kapamtalk_backend", error = %e, "Failed to listen for shutdown signal");
  }
  info!(target: "kapamtalk_backend", "Shutdown signal received");
}

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (store, cache, scorer, sessions).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "kapamtalk_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "kapamtalk_backend", open_sessions = state.open_sessions().await, "Server stopped");
  Ok(())
}
