//! Settlement System Module
//!
//! The wallet collaborator contract consumed by the bet ledger, an in-memory
//! wallet for tests and single-node deployments, and per-round settlement
//! accounting.

use crate::games::types::{Amount, Bet, BetState};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Balance-affecting transition a wallet call belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Debit at placement
    Stake,
    /// Full refund on cancel
    Refund,
    /// Credit on a crash cash-out
    Cashout,
    /// Credit for a winning color bet
    Payout,
}

/// Idempotency tag: one bet, one transition.
///
/// A wallet that has already applied a tag must acknowledge a replay without
/// moving money again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletTag {
    pub bet_id: Uuid,
    pub kind: TransitionKind,
}

impl WalletTag {
    pub fn new(bet_id: Uuid, kind: TransitionKind) -> Self {
        Self { bet_id, kind }
    }
}

impl fmt::Display for WalletTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TransitionKind::Stake => "stake",
            TransitionKind::Refund => "refund",
            TransitionKind::Cashout => "cashout",
            TransitionKind::Payout => "payout",
        };
        write!(f, "bet:{}:{}", self.bet_id, kind)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    Insufficient { balance: Amount, requested: Amount },

    #[error("Wallet unavailable: {0}")]
    Unavailable(String),
}

/// External wallet consumed by the ledger.
///
/// Both mutations are atomic and return the balance after the call.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn debit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError>;

    async fn credit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError>;

    async fn balance(&self, participant: &str) -> Result<Amount, WalletError>;
}

/// Applied wallet mutation
#[derive(Debug, Clone, PartialEq)]
pub struct WalletEntry {
    pub participant: String,
    pub tag: WalletTag,
    pub amount: Amount,
    pub balance_after: Amount,
}

/// In-process wallet keyed by participant
pub struct InMemoryWallet {
    initial_balance: Amount,
    balances: DashMap<String, Amount>,
    applied: DashMap<WalletTag, WalletEntry>,
}

impl InMemoryWallet {
    /// Unknown participants open with `initial_balance`
    pub fn new(initial_balance: Amount) -> Self {
        Self {
            initial_balance,
            balances: DashMap::new(),
            applied: DashMap::new(),
        }
    }

    /// Overwrite a participant's balance (seeding and tests)
    pub fn set_balance(&self, participant: &str, amount: Amount) {
        self.balances.insert(participant.to_string(), amount);
    }

    /// Every mutation applied so far, in no particular order
    pub fn entries(&self) -> Vec<WalletEntry> {
        self.applied.iter().map(|e| e.value().clone()).collect()
    }

    /// Whether a tag has already moved money
    pub fn has_applied(&self, tag: &WalletTag) -> bool {
        self.applied.contains_key(tag)
    }

    fn apply(
        &self,
        participant: &str,
        amount: Amount,
        tag: &WalletTag,
        debit: bool,
    ) -> Result<Amount, WalletError> {
        // The balance entry stays locked for the whole check-and-apply
        let mut balance = self
            .balances
            .entry(participant.to_string())
            .or_insert(self.initial_balance);

        if self.applied.contains_key(tag) {
            return Ok(*balance);
        }

        if debit {
            if *balance < amount {
                return Err(WalletError::Insufficient {
                    balance: *balance,
                    requested: amount,
                });
            }
            *balance -= amount;
        } else {
            *balance = balance.saturating_add(amount);
        }

        self.applied.insert(
            tag.clone(),
            WalletEntry {
                participant: participant.to_string(),
                tag: tag.clone(),
                amount,
                balance_after: *balance,
            },
        );
        Ok(*balance)
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn debit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError> {
        self.apply(participant, amount, tag, true)
    }

    async fn credit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError> {
        self.apply(participant, amount, tag, false)
    }

    async fn balance(&self, participant: &str) -> Result<Amount, WalletError> {
        Ok(self
            .balances
            .get(participant)
            .map(|b| *b)
            .unwrap_or(self.initial_balance))
    }
}

/// Where every stake of a round ended up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub bets: usize,
    pub staked: u128,
    pub refunded: u128,
    /// Stakes of cashed-out or winning bets
    pub winning_stakes: u128,
    /// Credits paid to cashed-out or winning bets
    pub paid_out: u128,
    /// Stakes kept on lost bets
    pub retained: u128,
    /// Stakes still in play
    pub open: u128,
}

impl RoundSummary {
    pub fn from_bets<'a>(bets: impl IntoIterator<Item = &'a Bet>) -> Self {
        let mut summary = RoundSummary::default();
        for bet in bets {
            let amount = bet.amount as u128;
            summary.bets += 1;
            summary.staked += amount;
            match bet.state {
                BetState::Canceled => summary.refunded += amount,
                BetState::CashedOut | BetState::Won => {
                    summary.winning_stakes += amount;
                    summary.paid_out += bet.payout as u128;
                }
                BetState::Lost => summary.retained += amount,
                BetState::Placed | BetState::Idle => summary.open += amount,
            }
        }
        summary
    }

    /// House result of the round (positive = house won)
    pub fn house_net(&self) -> i128 {
        self.staked as i128 - self.refunded as i128 - self.paid_out as i128
    }
}
