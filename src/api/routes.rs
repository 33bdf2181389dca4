//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::observer_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Participant commands
        .route("/api/:game/bet", post(place_bet_handler))
        .route("/api/:game/cancel", post(cancel_bet_handler))
        .route("/api/:game/cashout", post(cashout_handler))
        // Round views
        .route("/api/:game/state", get(round_state_handler))
        .route("/api/:game/history", get(round_history_handler))
        .route("/api/wallet", get(wallet_handler))
        // Snapshot plus ordered round events
        .route("/ws/:game", get(observer_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
