//! Bet book for one round.
//!
//! Every balance-affecting transition goes through here exactly once. A bet
//! leaves `Placed` for one terminal state and never moves again. Replays of a
//! terminal operation are rejected before the wallet is touched, unless the
//! first call went unanswered: then the same tag and amount are re-issued.

use crate::errors::AscentResult;
use crate::games::outcome::ColorPayouts;
use crate::games::scheduler::Flight;
use crate::games::settlement::{RoundSummary, TransitionKind, Wallet, WalletError, WalletTag};
use crate::games::types::{
    Amount, Bet, BetState, BetView, Color, GameKind, Multiplier, ParticipantId, Phase, RoundId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Participant-facing rejection. Every variant leaves round and wallet unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BetError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Amount, requested: Amount },

    #[error("Not allowed while the round is {actual}; requires the {expected} phase")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("A bet is already open for this round")]
    DuplicateBet,

    #[error("No bet in the current round")]
    NoActiveBet,

    #[error("Too late: the round crashed before the cash-out was received")]
    RaceLost,

    #[error("Bet already settled as {state}")]
    AlreadySettled { state: BetState },

    #[error("Round {round_id} was interrupted by a scheduler restart and forfeited")]
    SchedulerRestartForfeit { round_id: RoundId },

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Wallet unavailable, please retry: {0}")]
    WalletUnavailable(String),

    #[error("Round journal unavailable, please retry: {0}")]
    StorageUnavailable(String),
}

impl BetError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BetError::InvalidAmount(_) => "INVALID_AMOUNT",
            BetError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BetError::WrongPhase { .. } => "WRONG_PHASE",
            BetError::DuplicateBet => "DUPLICATE_BET",
            BetError::NoActiveBet => "NO_ACTIVE_BET",
            BetError::RaceLost => "RACE_LOST",
            BetError::AlreadySettled { .. } => "ALREADY_SETTLED",
            BetError::SchedulerRestartForfeit { .. } => "SCHEDULER_RESTART_FORFEIT",
            BetError::InvalidChoice(_) => "INVALID_CHOICE",
            BetError::UnsupportedCommand(_) => "UNSUPPORTED_COMMAND",
            BetError::WalletUnavailable(_) => "WALLET_UNAVAILABLE",
            BetError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

impl From<WalletError> for BetError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Insufficient { balance, requested } => {
                BetError::InsufficientBalance { balance, requested }
            }
            WalletError::Unavailable(msg) => BetError::WalletUnavailable(msg),
        }
    }
}

/// Successful command: the bet after the transition and the wallet balance
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub bet: Bet,
    pub balance: Amount,
}

/// Why open bets are being swept to `Lost`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReason {
    /// Crash cut reached
    Crash,
    /// Color revealed
    Reveal,
    /// Round interrupted and forfeited
    Forfeit,
}

/// Durable copy of the round's bets, written around every wallet call
pub trait Checkpoint: Send + Sync {
    fn save(&self, bets: &[Bet]) -> AscentResult<()>;
}

/// Checkpoint for ledgers nobody journals
pub struct Volatile;

impl Checkpoint for Volatile {
    fn save(&self, _bets: &[Bet]) -> AscentResult<()> {
        Ok(())
    }
}

/// Collaborators a money-moving ledger call needs
#[derive(Clone, Copy)]
pub struct Books<'a> {
    pub wallet: &'a dyn Wallet,
    pub checkpoint: &'a dyn Checkpoint,
}

/// The wallet's final answer to a call that was left pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAnswer {
    Confirmed,
    /// Stake refused for balance: the bet never existed
    Refused,
}

/// Apply a late wallet answer to journaled bets. Answers that no longer match
/// the bet's outstanding call are ignored.
pub fn apply_answer(bets: &mut Vec<Bet>, bet_id: Uuid, kind: TransitionKind, answer: CallAnswer) -> bool {
    let Some(index) = bets.iter().position(|b| b.id == bet_id) else {
        return false;
    };
    if bets[index].outstanding() != Some(kind) {
        return false;
    }
    match answer {
        CallAnswer::Confirmed => bets[index].pending = false,
        CallAnswer::Refused => {
            bets.remove(index);
        }
    }
    true
}

pub struct BetLedger {
    game: GameKind,
    round_id: RoundId,
    /// Placement order
    bets: Vec<Bet>,
    /// Index of each participant's most recent bet
    latest: HashMap<ParticipantId, usize>,
    /// Bets dropped after their stake was refused, not yet taken by the engine
    voided: Vec<Uuid>,
    crashed: bool,
}

impl BetLedger {
    pub fn new(game: GameKind, round_id: RoundId) -> Self {
        Self {
            game,
            round_id,
            bets: Vec::new(),
            latest: HashMap::new(),
            voided: Vec::new(),
            crashed: false,
        }
    }

    /// Rebuild a ledger from journaled bets
    pub fn restore(game: GameKind, round_id: RoundId, bets: Vec<Bet>) -> Self {
        let mut ledger = Self::new(game, round_id);
        ledger.bets = bets;
        ledger.reindex();
        ledger
    }

    fn reindex(&mut self) {
        self.latest.clear();
        for (index, bet) in self.bets.iter().enumerate() {
            self.latest.insert(bet.participant.clone(), index);
        }
    }

    pub fn game(&self) -> GameKind {
        self.game
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    /// A participant's most recent bet in this round
    pub fn bet_for(&self, participant: &str) -> Option<&Bet> {
        self.latest.get(participant).map(|&i| &self.bets[i])
    }

    pub fn views(&self) -> Vec<BetView> {
        self.bets.iter().map(Bet::view).collect()
    }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary::from_bets(&self.bets)
    }

    pub fn has_pending(&self) -> bool {
        self.bets.iter().any(|b| b.pending)
    }

    /// Ids of bets voided since the last call
    pub fn take_voided(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.voided)
    }

    /// Apply a late wallet answer from the outbox
    pub fn apply_answer(&mut self, bet_id: Uuid, kind: TransitionKind, answer: CallAnswer) -> bool {
        let changed = apply_answer(&mut self.bets, bet_id, kind, answer);
        if changed && answer == CallAnswer::Refused {
            self.reindex();
        }
        changed
    }

    fn open_bet(&self, participant: &str) -> Result<usize, BetError> {
        let index = *self.latest.get(participant).ok_or(BetError::NoActiveBet)?;
        let state = self.bets[index].state;
        if state.is_terminal() {
            return Err(BetError::AlreadySettled { state });
        }
        Ok(index)
    }

    /// Journal the staged state. Failing here aborts the command.
    fn stage(&self, books: &Books<'_>) -> Result<(), BetError> {
        books
            .checkpoint
            .save(&self.bets)
            .map_err(|e| BetError::StorageUnavailable(e.to_string()))
    }

    /// Journal the confirmed state. The wallet already moved, so a failure
    /// only leaves the bet pending in the journal.
    fn record(&self, books: &Books<'_>) {
        if let Err(e) = books.checkpoint.save(&self.bets) {
            warn!(round_id = self.round_id, error = %e, "Checkpoint after wallet call failed");
        }
    }

    fn void(&mut self, index: usize) {
        let bet = self.bets.remove(index);
        self.voided.push(bet.id);
        self.reindex();
    }

    /// Debit the stake and open a bet. Betting window only.
    ///
    /// A participant whose previous debit went unanswered gets that debit
    /// re-issued under its original tag instead of a second bet.
    pub async fn place(
        &mut self,
        participant: &str,
        amount: Amount,
        choice: Option<Color>,
        phase: Phase,
        books: Books<'_>,
    ) -> Result<Receipt, BetError> {
        if amount == 0 {
            return Err(BetError::InvalidAmount("amount must be positive".to_string()));
        }
        if phase != Phase::Waiting {
            return Err(BetError::WrongPhase {
                expected: Phase::Waiting,
                actual: phase,
            });
        }
        if let Some(&index) = self.latest.get(participant) {
            let existing = &self.bets[index];
            if existing.outstanding() == Some(TransitionKind::Stake) {
                let retried = existing.amount == amount && existing.choice == choice;
                let balance = self.confirm_stake(index, books).await?;
                if !retried {
                    return Err(BetError::DuplicateBet);
                }
                return Ok(Receipt {
                    bet: self.bets[index].clone(),
                    balance,
                });
            }
            if !existing.state.is_terminal() {
                return Err(BetError::DuplicateBet);
            }
        }

        let mut bet = Bet::new(self.round_id, participant.to_string(), amount, choice);
        bet.pending = true;
        let tag = WalletTag::new(bet.id, TransitionKind::Stake);
        let index = self.bets.len();
        let previous = self.latest.insert(participant.to_string(), index);
        self.bets.push(bet);

        if let Err(e) = self.stage(&books) {
            self.unstage_placement(participant, previous);
            return Err(e);
        }

        match books.wallet.debit(participant, amount, &tag).await {
            Ok(balance) => {
                self.bets[index].pending = false;
                self.record(&books);
                debug!(round_id = self.round_id, participant, amount, "Bet placed");
                Ok(Receipt {
                    bet: self.bets[index].clone(),
                    balance,
                })
            }
            Err(WalletError::Insufficient { balance, requested }) => {
                self.unstage_placement(participant, previous);
                self.record(&books);
                Err(BetError::InsufficientBalance { balance, requested })
            }
            Err(e) => {
                // The debit may have landed: the bet stays, pending under its tag
                warn!(round_id = self.round_id, participant, amount, error = %e, "Stake unanswered, bet kept pending");
                Err(e.into())
            }
        }
    }

    fn unstage_placement(&mut self, participant: &str, previous: Option<usize>) {
        self.bets.pop();
        match previous {
            Some(index) => self.latest.insert(participant.to_string(), index),
            None => self.latest.remove(participant),
        };
    }

    /// Re-issue the unanswered stake of the bet at `index`. A refusal for
    /// balance voids the bet.
    async fn confirm_stake(&mut self, index: usize, books: Books<'_>) -> Result<Amount, BetError> {
        let bet = &self.bets[index];
        let tag = WalletTag::new(bet.id, TransitionKind::Stake);
        let (participant, amount) = (bet.participant.clone(), bet.amount);

        match books.wallet.debit(&participant, amount, &tag).await {
            Ok(balance) => {
                self.bets[index].pending = false;
                self.record(&books);
                debug!(round_id = self.round_id, participant = %participant, amount, "Unanswered stake confirmed");
                Ok(balance)
            }
            Err(WalletError::Insufficient { balance, requested }) => {
                self.void(index);
                self.record(&books);
                debug!(round_id = self.round_id, participant = %participant, amount, "Unanswered stake refused, bet voided");
                Err(BetError::InsufficientBalance { balance, requested })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-issue the unanswered credit of the bet at `index` for the amount
    /// already recorded on it
    async fn confirm_credit(&mut self, index: usize, kind: TransitionKind, books: Books<'_>) -> Result<Receipt, BetError> {
        let bet = &self.bets[index];
        let tag = WalletTag::new(bet.id, kind);
        let (participant, payout) = (bet.participant.clone(), bet.payout);

        let balance = books.wallet.credit(&participant, payout, &tag).await?;
        self.bets[index].pending = false;
        self.record(&books);
        debug!(round_id = self.round_id, participant = %participant, payout, "Unanswered credit confirmed");
        Ok(Receipt {
            bet: self.bets[index].clone(),
            balance,
        })
    }

    /// Settle the participant's unanswered wallet call before running a new
    /// `command`. `Some` ends the command: either the retried transition is
    /// now confirmed, or the wallet still does not answer.
    async fn resume(
        &mut self,
        participant: &str,
        command: TransitionKind,
        books: Books<'_>,
    ) -> Option<Result<Receipt, BetError>> {
        let index = *self.latest.get(participant)?;
        let bet = &self.bets[index];
        match bet.outstanding()? {
            TransitionKind::Stake if bet.state == BetState::Placed => {
                match self.confirm_stake(index, books).await {
                    Ok(_) => None,
                    Err(BetError::InsufficientBalance { .. }) => Some(Err(BetError::NoActiveBet)),
                    Err(e) => Some(Err(e)),
                }
            }
            // Already swept; the outbox answers it
            TransitionKind::Stake => None,
            kind => Some(match self.confirm_credit(index, kind, books).await {
                Ok(receipt) if kind == command => Ok(receipt),
                Ok(receipt) => Err(BetError::AlreadySettled {
                    state: receipt.bet.state,
                }),
                Err(e) => Err(e),
            }),
        }
    }

    /// Stage `settled` in place of the bet at `index` and credit its payout.
    ///
    /// Only a definitive refusal rolls back. An unanswered credit leaves the
    /// staged state pending, to be confirmed under the same tag and amount.
    async fn apply_credit(
        &mut self,
        index: usize,
        mut settled: Bet,
        kind: TransitionKind,
        books: Books<'_>,
    ) -> Result<Receipt, BetError> {
        settled.pending = true;
        settled.settled_at = Some(Utc::now());
        let tag = WalletTag::new(settled.id, kind);
        let (participant, payout) = (settled.participant.clone(), settled.payout);
        let before = std::mem::replace(&mut self.bets[index], settled);

        if let Err(e) = self.stage(&books) {
            self.bets[index] = before;
            return Err(e);
        }

        match books.wallet.credit(&participant, payout, &tag).await {
            Ok(balance) => {
                self.bets[index].pending = false;
                self.record(&books);
                Ok(Receipt {
                    bet: self.bets[index].clone(),
                    balance,
                })
            }
            Err(e @ WalletError::Insufficient { .. }) => {
                self.bets[index] = before;
                self.record(&books);
                Err(e.into())
            }
            Err(e) => {
                warn!(round_id = self.round_id, participant = %participant, payout, error = %e, "Credit unanswered, bet kept pending");
                Err(e.into())
            }
        }
    }

    /// Refund the full stake. Betting window only.
    pub async fn cancel(
        &mut self,
        participant: &str,
        phase: Phase,
        books: Books<'_>,
    ) -> Result<Receipt, BetError> {
        if let Some(done) = self.resume(participant, TransitionKind::Refund, books).await {
            return done;
        }
        let index = self.open_bet(participant)?;
        if phase != Phase::Waiting {
            return Err(BetError::WrongPhase {
                expected: Phase::Waiting,
                actual: phase,
            });
        }

        let mut settled = self.bets[index].clone();
        settled.state = BetState::Canceled;
        settled.payout = settled.amount;

        let receipt = self.apply_credit(index, settled, TransitionKind::Refund, books).await?;
        debug!(round_id = self.round_id, participant, amount = receipt.bet.amount, "Bet canceled");
        Ok(receipt)
    }

    /// Credit `amount × m(observed_at)` if `observed_at` is strictly before the crash cut
    pub async fn cashout(
        &mut self,
        participant: &str,
        phase: Phase,
        observed_at: Duration,
        flight: &Flight,
        books: Books<'_>,
    ) -> Result<Receipt, BetError> {
        if let Some(done) = self.resume(participant, TransitionKind::Cashout, books).await {
            return done;
        }
        let index = match self.open_bet(participant) {
            Err(BetError::AlreadySettled {
                state: BetState::Lost,
            }) if self.crashed => return Err(BetError::RaceLost),
            other => other?,
        };
        if phase != Phase::Active {
            return Err(BetError::WrongPhase {
                expected: Phase::Active,
                actual: phase,
            });
        }
        if observed_at >= flight.cut {
            return Err(BetError::RaceLost);
        }

        let multiplier = flight.multiplier_at(observed_at);
        let mut settled = self.bets[index].clone();
        settled.state = BetState::CashedOut;
        settled.multiplier = Some(multiplier);
        settled.payout = multiplier.apply(settled.amount);

        let receipt = self.apply_credit(index, settled, TransitionKind::Cashout, books).await?;
        debug!(round_id = self.round_id, participant, %multiplier, payout = receipt.bet.payout, "Bet cashed out");
        Ok(receipt)
    }

    /// Every bet still `Placed` becomes `Lost`. No wallet call: the stake was
    /// debited at placement, or is still owed under its tag.
    pub fn settle_remaining(&mut self, reason: SweepReason) -> usize {
        if reason == SweepReason::Crash {
            self.crashed = true;
        }
        let now = Utc::now();
        let mut swept = 0;
        for bet in self.bets.iter_mut().filter(|b| b.state == BetState::Placed) {
            bet.state = BetState::Lost;
            bet.settled_at = Some(now);
            swept += 1;
        }
        swept
    }

    /// Decide a revealed color: matching picks become `Won` with their credit
    /// pending, the rest `Lost`. A bet whose stake was never answered cannot win.
    ///
    /// No wallet call: the engine queues the winners' credits.
    pub fn settle_color(&mut self, winner: Color, payouts: &ColorPayouts) -> usize {
        let multiplier: Multiplier = payouts.for_color(winner);
        let now = Utc::now();
        let mut winners = 0;

        for bet in self.bets.iter_mut().filter(|b| b.state == BetState::Placed) {
            bet.settled_at = Some(now);
            if bet.choice == Some(winner) && !bet.pending {
                bet.state = BetState::Won;
                bet.multiplier = Some(multiplier);
                bet.payout = multiplier.apply(bet.amount);
                bet.pending = true;
                winners += 1;
            } else {
                bet.state = BetState::Lost;
            }
        }
        winners
    }
}
