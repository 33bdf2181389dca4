//! API Request and Response Models

use crate::games::{Color, CommandResult, GameKind, Multiplier, Phase, RoundOutcome, RoundSummary};
use crate::storage::RoundRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// POST /api/:game/bet body
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetRequest {
    pub amount: f64,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub game: GameKind,
    pub rounds: Vec<RoundHistoryEntry>,
}

/// One archived round, without per-bet detail
#[derive(Debug, Clone, Serialize)]
pub struct RoundHistoryEntry {
    pub round_id: u64,
    pub phase: Phase,
    pub forfeited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_label: Option<Color>,
    pub bets: usize,
    pub staked: u64,
    pub paid_out: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&RoundRecord> for RoundHistoryEntry {
    fn from(record: &RoundRecord) -> Self {
        let outcome: Option<RoundOutcome> = (!record.forfeited).then_some(record.outcome);
        let summary: &RoundSummary = &record.summary;
        Self {
            round_id: record.round_id,
            phase: record.phase,
            forfeited: record.forfeited,
            final_multiplier: outcome.and_then(|o| o.crash_point()),
            result_label: outcome.and_then(|o| o.color()),
            bets: summary.bets,
            staked: summary.staked as u64,
            paid_out: summary.paid_out as u64,
            created_at: record.created_at,
            resolved_at: record.resolved_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletResponse {
    pub participant: String,
    pub balance: u64,
}

/// Observer socket query string
#[derive(Debug, Clone, Deserialize)]
pub struct ObserverQuery {
    #[serde(default)]
    pub participant: Option<String>,
}

/// Replies written on the observer socket besides bus events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketReply {
    CommandResult {
        command: &'static str,
        #[serde(flatten)]
        result: CommandResult,
    },
    Error {
        message: String,
    },
}
