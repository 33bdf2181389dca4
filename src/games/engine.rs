//! The round-scoped serialization point.
//!
//! One [`GameEngine`] runs one game. Its mutex guards the scheduler and the bet
//! ledger together; every command, tick and subscription takes it, first
//! advances the round to the clock's `now()`, and only then looks at phase or
//! bets. Events are published while the lock is held.
//!
//! Inside the lock a command makes at most its own wallet call. Credits decided
//! by a reveal or a forfeit, and calls the wallet left unanswered, go to the
//! outbox and are issued after the lock is released.

use crate::clock::Clock;
use crate::config::{ColorConfig, CrashConfig};
use crate::errors::AscentResult;
use crate::games::bus::{BroadcastBus, RecentResult, RoundEvent, RoundSnapshot, Subscription};
use crate::games::ledger::{apply_answer, BetError, BetLedger, Books, CallAnswer, Checkpoint, Receipt, SweepReason};
use crate::games::outcome::{ColorPayouts, OutcomeGenerator};
use crate::games::pending_pool::{PendingPayout, PendingPayoutPool};
use crate::games::scheduler::{PhaseTimings, Round, RoundScheduler, Transition};
use crate::games::settlement::{RoundSummary, TransitionKind, Wallet, WalletError};
use crate::games::types::{Amount, Bet, Color, GameKind, Phase, RoundOutcome};
use crate::metrics::EngineMetrics;
use crate::storage::{RoundJournal, RoundRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use tracing::{debug, error, info, warn};

/// Results shown to late joiners
pub const RECENT_RESULTS: usize = 10;

const BUS_CAPACITY: usize = 1024;

/// Per-game rules the engine runs with
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timings: PhaseTimings,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub color_payouts: Option<ColorPayouts>,
    pub timer_tick: Duration,
    /// Crash game only
    pub multiplier_tick: Option<Duration>,
    pub recent_results: usize,
    pub bus_capacity: usize,
}

impl EngineSettings {
    pub fn crash(config: &CrashConfig) -> Self {
        Self {
            timings: PhaseTimings::crash(config),
            min_bet: config.min_bet,
            max_bet: config.max_bet,
            color_payouts: None,
            timer_tick: Duration::from_millis(config.timer_tick_ms),
            multiplier_tick: Some(Duration::from_millis(config.multiplier_tick_ms)),
            recent_results: RECENT_RESULTS,
            bus_capacity: BUS_CAPACITY,
        }
    }

    pub fn color(config: &ColorConfig) -> Self {
        Self {
            timings: PhaseTimings::color(config),
            min_bet: config.min_bet,
            max_bet: config.max_bet,
            color_payouts: Some(ColorPayouts::from_table(&config.payouts)),
            timer_tick: Duration::from_millis(config.timer_tick_ms),
            multiplier_tick: None,
            recent_results: RECENT_RESULTS,
            bus_capacity: BUS_CAPACITY,
        }
    }

    pub fn game(&self) -> GameKind {
        self.timings.game()
    }
}

/// Collaborators shared by every engine in the process
#[derive(Clone)]
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub wallet: Arc<dyn Wallet>,
    pub journal: Arc<dyn RoundJournal>,
    pub metrics: Arc<EngineMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForfeitCause {
    /// Unresolved round found in the journal at startup
    Restart,
    /// The scheduler task died mid-round
    SchedulerFailure,
}

/// What a forfeit did to the interrupted round
#[derive(Debug, Clone)]
pub struct ForfeitReport {
    pub game: GameKind,
    pub round_id: u64,
    pub cause: ForfeitCause,
    pub bets_lost: usize,
    /// Wallet calls of the round left to the outbox
    pub calls_queued: usize,
}

impl ForfeitReport {
    pub fn error(&self) -> BetError {
        BetError::SchedulerRestartForfeit {
            round_id: self.round_id,
        }
    }

    pub fn code(&self) -> &'static str {
        self.error().code()
    }
}

struct RoundState {
    scheduler: RoundScheduler,
    ledger: BetLedger,
}

/// Writes the open round around each wallet call
struct OpenRound<'a> {
    journal: &'a dyn RoundJournal,
    round: &'a Round,
}

impl Checkpoint for OpenRound<'_> {
    fn save(&self, bets: &[Bet]) -> AscentResult<()> {
        self.journal
            .save_open_round(&RoundRecord::capture(self.round, bets))
    }
}

pub struct GameEngine {
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    wallet: Arc<dyn Wallet>,
    journal: Arc<dyn RoundJournal>,
    metrics: Arc<EngineMetrics>,
    bus: BroadcastBus,
    outbox: PendingPayoutPool,
    state: Mutex<RoundState>,
}

impl GameEngine {
    /// Recover from the journal and open the first round.
    ///
    /// An unresolved round left in the journal is forfeited before anything
    /// else happens; the report says what it cost.
    pub async fn start(
        settings: EngineSettings,
        generator: OutcomeGenerator,
        deps: EngineDeps,
    ) -> AscentResult<(Arc<Self>, Option<ForfeitReport>)> {
        let game = settings.game();
        let now = deps.clock.now();
        let recovered = deps.journal.load_open_round(game)?;
        let last_id = deps.journal.last_round_id(game)?.unwrap_or(0);

        let (scheduler, ledger) = match &recovered {
            Some(record) => (
                RoundScheduler::restore(settings.timings, generator, record, now),
                BetLedger::restore(game, record.round_id, record.bets.clone()),
            ),
            None => {
                let scheduler = RoundScheduler::new(settings.timings, generator, last_id + 1, now);
                let ledger = BetLedger::new(game, scheduler.current().id);
                (scheduler, ledger)
            }
        };

        let outbox = PendingPayoutPool::new();
        for payout in deps.journal.pending_payouts(game)? {
            outbox.add_pending(payout);
        }
        if outbox.pending_count() > 0 {
            info!(%game, pending = outbox.pending_count(), "Restored pending credits");
        }

        let engine = Arc::new(Self {
            bus: BroadcastBus::new(game, settings.bus_capacity),
            settings,
            clock: deps.clock,
            wallet: deps.wallet,
            journal: deps.journal,
            metrics: deps.metrics,
            outbox,
            state: Mutex::new(RoundState { scheduler, ledger }),
        });

        let report = {
            let mut state = engine.state.lock().await;
            if recovered.is_some() {
                engine.forfeit_locked(&mut state, ForfeitCause::Restart).await
            } else {
                engine.save_open(&state);
                let round = state.scheduler.current();
                info!(%game, round_id = round.id, "Round opened");
                None
            }
        };

        Ok((engine, report))
    }

    pub fn game(&self) -> GameKind {
        self.settings.game()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn timer_tick(&self) -> Duration {
        self.settings.timer_tick
    }

    pub fn multiplier_tick(&self) -> Option<Duration> {
        self.settings.multiplier_tick
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub async fn balance(&self, participant: &str) -> Result<Amount, WalletError> {
        self.wallet.balance(participant).await
    }

    /// Wallet calls waiting for the wallet
    pub fn pending_credits(&self) -> Vec<PendingPayout> {
        self.outbox.snapshot()
    }

    fn books<'a>(&'a self, checkpoint: &'a dyn Checkpoint) -> Books<'a> {
        Books {
            wallet: self.wallet.as_ref(),
            checkpoint,
        }
    }

    fn save_open(&self, state: &RoundState) {
        let record = RoundRecord::capture(state.scheduler.current(), state.ledger.bets());
        if let Err(e) = self.journal.save_open_round(&record) {
            error!(game = %self.game(), round_id = record.round_id, error = %e, "Failed to journal open round");
        }
    }

    fn publish_bets(&self, state: &RoundState) {
        self.bus.publish(RoundEvent::Bets {
            round_id: state.scheduler.current().id,
            bets: state.ledger.views(),
        });
    }

    fn queue_call(&self, call: PendingPayout) {
        if let Err(e) = self.journal.save_pending_payout(&call) {
            error!(game = %self.game(), bet_id = %call.bet_id, error = %e, "Failed to journal pending wallet call");
        }
        self.outbox.add_pending(call);
    }

    fn drop_call(&self, bet_id: &Uuid) {
        if self.outbox.complete(bet_id).is_some() {
            if let Err(e) = self.journal.remove_pending_payout(self.game(), bet_id) {
                error!(game = %self.game(), %bet_id, error = %e, "Failed to remove answered wallet call");
            }
        }
    }

    /// Mirror the ledger's unanswered wallet calls into the outbox
    fn track_unanswered(&self, state: &mut RoundState) {
        for bet_id in state.ledger.take_voided() {
            self.drop_call(&bet_id);
        }
        for bet in state.ledger.bets() {
            match (bet.outstanding(), self.outbox.kind_of(&bet.id)) {
                (Some(owed), Some(queued)) if owed == queued => {}
                (Some(_), _) => self.queue_call(PendingPayout::for_bet(self.game(), bet)),
                (None, Some(_)) => self.drop_call(&bet.id),
                (None, None) => {}
            }
        }
    }

    /// Apply every transition due at `now`, in order
    async fn advance_locked(&self, state: &mut RoundState, now: Duration) {
        let game = self.game();
        while let Some((transition, at)) = state.scheduler.advance(now) {
            let round_id = state.scheduler.current().id;
            match transition {
                Transition::CloseBetting => {
                    info!(%game, round_id, bets = state.ledger.bets().len(), "Betting closed");
                    self.save_open(state);
                    self.bus.publish(RoundEvent::PhaseChanged {
                        round_id,
                        phase: Phase::Active,
                    });
                }
                Transition::Resolve => self.resolve_locked(state, at).await,
                Transition::OpenNext => {
                    state.ledger = BetLedger::new(game, round_id);
                    self.save_open(state);
                    info!(%game, round_id, "Round opened");
                    self.bus.publish(RoundEvent::PhaseChanged {
                        round_id,
                        phase: Phase::Waiting,
                    });
                    self.publish_bets(state);
                }
            }
        }
    }

    async fn resolve_locked(&self, state: &mut RoundState, at: Duration) {
        let game = self.game();
        let round_id = state.scheduler.current().id;
        let outcome = state.scheduler.current().hidden_outcome();

        match (outcome, self.settings.color_payouts) {
            (RoundOutcome::Color { color }, Some(payouts)) => {
                let winners = state.ledger.settle_color(color, &payouts);
                debug!(%game, round_id, winners, "Color settled");
            }
            (RoundOutcome::Color { .. }, None) => {
                state.ledger.settle_remaining(SweepReason::Reveal);
            }
            (RoundOutcome::Crash { .. }, _) => {
                let lost = state.ledger.settle_remaining(SweepReason::Crash);
                debug!(%game, round_id, lost, "Crash sweep");
            }
        }
        // Winners are owed through the outbox, credited once the lock is released
        self.track_unanswered(state);

        let record = RoundRecord::capture(state.scheduler.current(), state.ledger.bets());
        if let Err(e) = self.journal.archive_round(&record) {
            error!(%game, round_id, error = %e, "Failed to archive resolved round");
        }
        self.metrics.record_resolved(game, outcome.crash_point());

        let summary = &record.summary;
        info!(
            %game,
            round_id,
            %outcome,
            at_ms = at.as_millis() as u64,
            bets = summary.bets,
            staked = summary.staked as u64,
            paid_out = summary.paid_out as u64,
            retained = summary.retained as u64,
            house_net = summary.house_net() as i64,
            owed = self.outbox.pending_count(),
            "Round resolved"
        );

        self.bus.publish(RoundEvent::PhaseChanged {
            round_id,
            phase: Phase::Resolved,
        });
        self.bus.publish(RoundEvent::Outcome {
            round_id,
            final_multiplier: outcome.crash_point(),
            result_label: outcome.color(),
        });
        self.publish_bets(state);
    }

    /// Forfeit the round in progress, if it has not resolved yet, and open the next one
    async fn forfeit_locked(&self, state: &mut RoundState, cause: ForfeitCause) -> Option<ForfeitReport> {
        let game = self.game();
        let now = self.clock.now();
        let round_id = state.scheduler.current().id;

        if state.scheduler.current_phase() == Phase::Resolved && !state.scheduler.current().forfeited {
            // Nothing was interrupted: only the cooldown remained
            self.track_unanswered(state);
            let record = RoundRecord::capture(state.scheduler.current(), state.ledger.bets());
            if let Err(e) = self.journal.archive_round(&record) {
                error!(%game, round_id, error = %e, "Failed to archive resolved round");
            }
            self.advance_locked(state, now).await;
            return None;
        }

        let bets_lost = state.ledger.settle_remaining(SweepReason::Forfeit);
        state.scheduler.forfeit(now);
        // Interrupted wallet calls are finished by the outbox under their tags
        self.track_unanswered(state);
        let calls_queued = state.ledger.bets().iter().filter(|b| b.pending).count();

        let record = RoundRecord::capture(state.scheduler.current(), state.ledger.bets());
        if let Err(e) = self.journal.archive_round(&record) {
            error!(%game, round_id, error = %e, "Failed to archive forfeited round");
        }
        self.metrics.record_forfeit(game);

        let report = ForfeitReport {
            game,
            round_id,
            cause,
            bets_lost,
            calls_queued,
        };
        let reason = report.error();
        warn!(
            %game,
            round_id,
            code = reason.code(),
            ?cause,
            bets_lost,
            calls_queued,
            "{}",
            reason
        );

        self.bus.publish(RoundEvent::RoundForfeited {
            round_id,
            code: reason.code(),
            message: reason.to_string(),
        });
        self.publish_bets(state);
        self.advance_locked(state, now).await;

        Some(report)
    }

    /// Forfeit whatever round is in progress (scheduler failure path)
    pub async fn forfeit_current(&self, cause: ForfeitCause) -> Option<ForfeitReport> {
        let mut state = self.state.lock().await;
        self.forfeit_locked(&mut state, cause).await
    }

    pub async fn place(
        &self,
        participant: &str,
        amount: Amount,
        choice: Option<Color>,
    ) -> Result<Receipt, BetError> {
        match (self.game(), choice) {
            (GameKind::Crash, Some(_)) => {
                return Err(BetError::InvalidChoice("crash bets take no color".to_string()))
            }
            (GameKind::Color, None) => {
                return Err(BetError::InvalidChoice("pick red, green or violet".to_string()))
            }
            _ => {}
        }

        let mut guard = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut guard, now).await;

        let state = &mut *guard;
        let phase = state.scheduler.current_phase();
        let checkpoint = OpenRound {
            journal: self.journal.as_ref(),
            round: state.scheduler.current(),
        };
        let result = state
            .ledger
            .place(participant, amount, choice, phase, self.books(&checkpoint))
            .await;
        self.track_unanswered(state);
        let receipt = result?;

        self.metrics.record_wager(self.game(), amount);
        self.publish_bets(state);
        Ok(receipt)
    }

    pub async fn cancel(&self, participant: &str) -> Result<Receipt, BetError> {
        let mut guard = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut guard, now).await;

        let state = &mut *guard;
        let phase = state.scheduler.current_phase();
        let checkpoint = OpenRound {
            journal: self.journal.as_ref(),
            round: state.scheduler.current(),
        };
        let result = state
            .ledger
            .cancel(participant, phase, self.books(&checkpoint))
            .await;
        self.track_unanswered(state);
        let receipt = result?;

        self.metrics.record_credit(self.game(), receipt.bet.payout);
        self.publish_bets(state);
        Ok(receipt)
    }

    /// Cash out at the multiplier of the instant the round lock was taken
    pub async fn cashout(&self, participant: &str) -> Result<Receipt, BetError> {
        if self.game() != GameKind::Crash {
            return Err(BetError::UnsupportedCommand(format!(
                "cash-out is not available in the {} game",
                self.game()
            )));
        }

        let mut guard = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut guard, now).await;

        let state = &mut *guard;
        let phase = state.scheduler.current_phase();
        let Some(flight) = state.scheduler.flight() else {
            return Err(BetError::UnsupportedCommand("round has no flight".to_string()));
        };
        let checkpoint = OpenRound {
            journal: self.journal.as_ref(),
            round: state.scheduler.current(),
        };
        let result = state
            .ledger
            .cashout(participant, phase, now, &flight, self.books(&checkpoint))
            .await;
        self.track_unanswered(state);
        let receipt = result?;

        self.metrics.record_credit(self.game(), receipt.bet.payout);
        self.publish_bets(state);
        Ok(receipt)
    }

    /// The participant's latest bet in the current round
    pub async fn bet_for(&self, participant: &str) -> Option<Bet> {
        let mut state = self.state.lock().await;
        self.advance_locked(&mut state, self.clock.now()).await;
        state.ledger.bet_for(participant).cloned()
    }

    pub async fn current_phase(&self) -> Phase {
        let mut state = self.state.lock().await;
        self.advance_locked(&mut state, self.clock.now()).await;
        state.scheduler.current_phase()
    }

    fn snapshot_locked(&self, state: &RoundState, now: Duration) -> RoundSnapshot {
        let round = state.scheduler.current();
        let recent = match self.journal.recent_rounds(self.game(), self.settings.recent_results) {
            Ok(records) => records
                .iter()
                .map(|r| RecentResult::new(r.round_id, (!r.forfeited).then_some(r.outcome), r.forfeited))
                .collect(),
            Err(e) => {
                warn!(game = %self.game(), error = %e, "Recent results unavailable");
                Vec::new()
            }
        };

        RoundSnapshot {
            game: self.game(),
            round_id: round.id,
            phase: round.phase,
            seconds_remaining: state.scheduler.seconds_remaining(now),
            multiplier: state.scheduler.multiplier_at(now),
            outcome: round
                .outcome()
                .map(|o| RecentResult::new(round.id, Some(o), false)),
            bets: state.ledger.views(),
            recent,
            seq: self.bus.last_seq(),
        }
    }

    pub async fn snapshot(&self) -> RoundSnapshot {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut state, now).await;
        self.snapshot_locked(&state, now)
    }

    /// Snapshot and event stream taken atomically
    pub async fn subscribe(&self) -> Subscription {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut state, now).await;
        let snapshot = self.snapshot_locked(&state, now);
        self.bus.attach(snapshot)
    }

    /// Resolved rounds, newest first
    pub fn history(&self, limit: usize) -> AscentResult<Vec<RoundRecord>> {
        self.journal.recent_rounds(self.game(), limit)
    }

    pub async fn until_next_transition(&self) -> Duration {
        let state = self.state.lock().await;
        state
            .scheduler
            .next_deadline()
            .saturating_sub(self.clock.now())
    }

    /// Apply due transitions, then issue whatever they left in the outbox
    pub async fn advance(&self) -> AscentResult<()> {
        {
            let mut state = self.state.lock().await;
            self.advance_locked(&mut state, self.clock.now()).await;
        }
        if self.outbox.pending_count() > 0 {
            self.retry_pending_credits().await?;
        }
        Ok(())
    }

    /// Timer cadence: phase tick, then one pass over the outbox
    pub async fn on_timer_tick(&self) -> AscentResult<()> {
        {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            self.advance_locked(&mut state, now).await;
            self.bus.publish(RoundEvent::PhaseTick {
                round_id: state.scheduler.current().id,
                phase: state.scheduler.current_phase(),
                seconds_remaining: state.scheduler.seconds_remaining(now),
            });
        }
        self.retry_pending_credits().await?;
        Ok(())
    }

    /// Multiplier cadence: publish the live multiplier while in flight
    pub async fn on_multiplier_tick(&self) -> AscentResult<()> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.advance_locked(&mut state, now).await;

        if let (Some(multiplier), Some(flight)) = (state.scheduler.multiplier_at(now), state.scheduler.flight()) {
            self.bus.publish(RoundEvent::MultiplierTick {
                round_id: state.scheduler.current().id,
                multiplier,
                elapsed_ms: now.saturating_sub(flight.started_at).as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Re-issue queued wallet calls with their original tags and amounts.
    ///
    /// The wallet is called without the round lock; the answers are then
    /// applied to the current round or to its archived record.
    pub async fn retry_pending_credits(&self) -> AscentResult<usize> {
        let game = self.game();
        let mut answered = Vec::new();

        for call in self.outbox.snapshot() {
            let tag = call.tag();
            let result = match call.kind {
                TransitionKind::Stake => self.wallet.debit(&call.participant, call.amount, &tag).await,
                _ => self.wallet.credit(&call.participant, call.amount, &tag).await,
            };

            let answer = match result {
                Ok(balance) => {
                    match call.kind {
                        TransitionKind::Stake => self.metrics.record_wager(game, call.amount),
                        _ => self.metrics.record_credit(game, call.amount),
                    }
                    info!(
                        %game,
                        round_id = call.round_id,
                        participant = %call.participant,
                        kind = ?call.kind,
                        amount = call.amount,
                        balance,
                        "Pending wallet call settled"
                    );
                    CallAnswer::Confirmed
                }
                Err(WalletError::Insufficient { .. }) if call.kind == TransitionKind::Stake => {
                    warn!(%game, round_id = call.round_id, participant = %call.participant, "Unanswered stake refused, bet voided");
                    CallAnswer::Refused
                }
                Err(e) => {
                    let attempts = self.outbox.record_attempt(&call.bet_id).unwrap_or_default();
                    debug!(%game, bet_id = %call.bet_id, attempts, error = %e, "Pending wallet call still unanswered");
                    continue;
                }
            };

            if self.outbox.complete_call(&call.bet_id, call.kind) {
                if let Err(e) = self.journal.remove_pending_payout(game, &call.bet_id) {
                    error!(%game, bet_id = %call.bet_id, error = %e, "Failed to remove answered wallet call");
                }
            }
            answered.push((call, answer));
        }

        let settled = answered.len();
        if settled > 0 {
            self.apply_answers(answered).await;
        }
        Ok(settled)
    }

    async fn apply_answers(&self, answered: Vec<(PendingPayout, CallAnswer)>) {
        let game = self.game();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let current = state.ledger.round_id();
        let mut changed = false;

        for (call, answer) in answered {
            if call.round_id == current {
                changed |= state.ledger.apply_answer(call.bet_id, call.kind, answer);
                continue;
            }
            match self.journal.archived_round(game, call.round_id) {
                Ok(Some(mut record)) => {
                    if apply_answer(&mut record.bets, call.bet_id, call.kind, answer) {
                        record.summary = RoundSummary::from_bets(&record.bets);
                        if let Err(e) = self.journal.amend_archived(&record) {
                            error!(%game, round_id = call.round_id, error = %e, "Failed to amend archived round");
                        }
                    }
                }
                Ok(None) => debug!(%game, round_id = call.round_id, "Answered call belongs to no archived round"),
                Err(e) => error!(%game, round_id = call.round_id, error = %e, "Archived round unavailable"),
            }
        }

        if !changed {
            return;
        }
        let record = RoundRecord::capture(state.scheduler.current(), state.ledger.bets());
        let saved = if state.scheduler.current_phase() == Phase::Resolved {
            self.journal.amend_archived(&record)
        } else {
            self.journal.save_open_round(&record)
        };
        if let Err(e) = saved {
            error!(%game, round_id = current, error = %e, "Failed to journal answered wallet calls");
        }
        self.publish_bets(state);
    }
}
