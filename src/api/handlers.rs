//! Request Handlers
//!
//! Thin: every handler resolves the game, hands the command to its gateway and
//! shapes the answer.

use super::{
    errors::{ApiError, CommandResponse},
    middleware::{RequestId, PARTICIPANT_HEADER},
    models::*,
};
use crate::games::{ActionGateway, Command, GameKind, RoundSnapshot};
use crate::metrics::EngineMetrics;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub crash: Arc<ActionGateway>,
    pub color: Arc<ActionGateway>,
    pub metrics: Arc<EngineMetrics>,
    pub history_limit: usize,
    pub version: String,
}

impl AppState {
    pub fn gateway(&self, game: GameKind) -> &Arc<ActionGateway> {
        match game {
            GameKind::Crash => &self.crash,
            GameKind::Color => &self.color,
        }
    }
}

pub(crate) fn parse_game(request_id: &RequestId, game: &str) -> Result<GameKind, ApiError> {
    GameKind::all()
        .into_iter()
        .find(|g| g.as_str() == game)
        .ok_or_else(|| ApiError::not_found(request_id.0.clone(), format!("Unknown game '{}'", game)))
}

fn participant(request_id: &RequestId, headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(PARTICIPANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::bad_request(
                request_id.0.clone(),
                format!("Missing {} header", PARTICIPANT_HEADER),
            )
        })
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
    })
}

/// POST /api/:game/bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PlaceBetRequest>,
) -> Result<CommandResponse, ApiError> {
    let game = parse_game(&request_id, &game)?;
    let participant = participant(&request_id, &headers)?;
    let command = Command::Place {
        amount: body.amount,
        color: body.color,
    };
    Ok(CommandResponse(state.gateway(game).execute(&participant, command).await))
}

/// POST /api/:game/cancel
pub async fn cancel_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    headers: HeaderMap,
) -> Result<CommandResponse, ApiError> {
    let game = parse_game(&request_id, &game)?;
    let participant = participant(&request_id, &headers)?;
    Ok(CommandResponse(state.gateway(game).execute(&participant, Command::Cancel).await))
}

/// POST /api/:game/cashout (crash only; the color game answers UNSUPPORTED_COMMAND)
pub async fn cashout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    headers: HeaderMap,
) -> Result<CommandResponse, ApiError> {
    let game = parse_game(&request_id, &game)?;
    let participant = participant(&request_id, &headers)?;
    Ok(CommandResponse(state.gateway(game).execute(&participant, Command::Cashout).await))
}

/// GET /api/:game/state
pub async fn round_state_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    let game = parse_game(&request_id, &game)?;
    Ok(Json(state.gateway(game).engine().snapshot().await))
}

/// GET /api/:game/history?limit={n}
pub async fn round_history_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let game = parse_game(&request_id, &game)?;
    let limit = params.limit.clamp(1, state.history_limit.max(1));

    let records = state
        .gateway(game)
        .engine()
        .history(limit)
        .map_err(|e| ApiError::internal_error(request_id.0.clone(), format!("Failed to read history: {}", e)))?;

    Ok(Json(HistoryResponse {
        game,
        rounds: records.iter().map(RoundHistoryEntry::from).collect(),
    }))
}

/// GET /api/wallet
pub async fn wallet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<WalletResponse>, ApiError> {
    let participant = participant(&request_id, &headers)?;
    let balance = state
        .crash
        .engine()
        .balance(&participant)
        .await
        .map_err(|e| ApiError::service_unavailable(request_id.0.clone(), e.to_string()))?;

    Ok(Json(WalletResponse { participant, balance }))
}

/// GET /metrics
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::internal_error(request_id.0.clone(), e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
