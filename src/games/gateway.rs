//! Validating front door for participant commands.
//!
//! Amounts and choices are re-checked here; phase is never taken from the
//! caller. Commands from one participant queue on a per-participant lane, so a
//! cancel and a cash-out sent back to back reach the engine one after the other.

use crate::games::engine::GameEngine;
use crate::games::ledger::{BetError, Receipt};
use crate::games::types::{Amount, BetView, Color, GameKind};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Inbound command, as sent over HTTP or the observer socket
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Place {
        amount: f64,
        #[serde(default)]
        color: Option<String>,
    },
    Cancel,
    Cashout,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Place { .. } => "place",
            Command::Cancel => "cancel",
            Command::Cashout => "cashout",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// `{status, message, new_balance?}` plus the rejection code on errors
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet: Option<BetView>,
}

impl CommandResult {
    fn accepted(receipt: &Receipt, message: String) -> Self {
        Self {
            status: CommandStatus::Success,
            message,
            new_balance: Some(receipt.balance),
            code: None,
            bet: Some(receipt.bet.view()),
        }
    }

    pub fn rejected(error: &BetError) -> Self {
        Self {
            status: CommandStatus::Error,
            message: error.to_string(),
            new_balance: None,
            code: Some(error.code()),
            bet: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

pub struct ActionGateway {
    engine: Arc<GameEngine>,
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl ActionGateway {
    pub fn new(engine: Arc<GameEngine>) -> Self {
        Self {
            engine,
            lanes: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<GameEngine> {
        &self.engine
    }

    pub fn game(&self) -> GameKind {
        self.engine.game()
    }

    /// Run one command to completion and describe the result
    pub async fn execute(&self, participant: &str, command: Command) -> CommandResult {
        let game = self.game();
        let name = command.name();

        match self.dispatch(participant, command).await {
            Ok((receipt, message)) => {
                self.engine.metrics().record_command(game, name, "success");
                info!(
                    %game,
                    round_id = receipt.bet.round_id,
                    participant,
                    command = name,
                    state = %receipt.bet.state,
                    balance = receipt.balance,
                    "Command accepted"
                );
                CommandResult::accepted(&receipt, message)
            }
            Err(e) => {
                self.engine.metrics().record_command(game, name, e.code());
                debug!(%game, participant, command = name, code = e.code(), "Command rejected: {}", e);
                CommandResult::rejected(&e)
            }
        }
    }

    async fn dispatch(&self, participant: &str, command: Command) -> Result<(Receipt, String), BetError> {
        let lane = self
            .lanes
            .entry(participant.to_string())
            .or_default()
            .clone();

        let result = {
            let _turn = lane.lock().await;
            match command {
                Command::Place { amount, color } => {
                    let amount = self.parse_amount(amount)?;
                    let choice = parse_choice(color.as_deref())?;
                    let receipt = self.engine.place(participant, amount, choice).await?;
                    let message = match choice {
                        Some(color) => format!("Bet of {} placed on {}", amount, color),
                        None => format!("Bet of {} placed", amount),
                    };
                    Ok((receipt, message))
                }
                Command::Cancel => {
                    let receipt = self.engine.cancel(participant).await?;
                    let message = format!("Bet canceled, {} refunded", receipt.bet.payout);
                    Ok((receipt, message))
                }
                Command::Cashout => {
                    let receipt = self.engine.cashout(participant).await?;
                    let message = match receipt.bet.multiplier {
                        Some(m) => format!("Cashed out at {}x for {}", m, receipt.bet.payout),
                        None => format!("Cashed out for {}", receipt.bet.payout),
                    };
                    Ok((receipt, message))
                }
            }
        };

        drop(lane);
        self.lanes
            .remove_if(participant, |_, lane| Arc::strong_count(lane) == 1);
        result
    }

    /// Whole minor units within the game's limits
    pub fn parse_amount(&self, amount: f64) -> Result<Amount, BetError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(BetError::InvalidAmount("amount must be a positive number".to_string()));
        }
        if amount.fract() != 0.0 {
            return Err(BetError::InvalidAmount(
                "amount must be a whole number of minor units".to_string(),
            ));
        }
        if amount >= u64::MAX as f64 {
            return Err(BetError::InvalidAmount("amount is too large".to_string()));
        }

        let amount = amount as Amount;
        let settings = self.engine.settings();
        if amount < settings.min_bet || amount > settings.max_bet {
            return Err(BetError::InvalidAmount(format!(
                "amount must be between {} and {}",
                settings.min_bet, settings.max_bet
            )));
        }
        Ok(amount)
    }

    /// Participants with a command in progress
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }
}

fn parse_choice(color: Option<&str>) -> Result<Option<Color>, BetError> {
    color
        .map(|c| c.parse::<Color>().map_err(BetError::InvalidChoice))
        .transpose()
}
