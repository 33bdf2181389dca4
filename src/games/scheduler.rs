//! Round timeline and the task that drives it.
//!
//! [`RoundScheduler`] is pure bookkeeping over clock readings: it knows when
//! each phase ends and applies one transition at a time. The engine owns it
//! under the round lock, and the driver task only wakes the engine up.

use crate::config::{ColorConfig, CrashConfig};
use crate::games::engine::{ForfeitCause, GameEngine};
use crate::games::outcome::{MultiplierCurve, OutcomeGenerator};
use crate::games::types::{GameKind, Multiplier, Phase, RoundId, RoundOutcome};
use crate::storage::RoundRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Phase durations per game
#[derive(Debug, Clone, Copy)]
pub enum PhaseTimings {
    Crash {
        waiting: Duration,
        cooldown: Duration,
        curve: MultiplierCurve,
    },
    Color {
        waiting: Duration,
        reveal: Duration,
        cooldown: Duration,
    },
}

impl PhaseTimings {
    pub fn crash(config: &CrashConfig) -> Self {
        PhaseTimings::Crash {
            waiting: config.waiting(),
            cooldown: config.cooldown(),
            curve: MultiplierCurve::new(config.growth_rate),
        }
    }

    pub fn color(config: &ColorConfig) -> Self {
        PhaseTimings::Color {
            waiting: config.waiting(),
            reveal: config.reveal(),
            cooldown: config.cooldown(),
        }
    }

    pub fn game(&self) -> GameKind {
        match self {
            PhaseTimings::Crash { .. } => GameKind::Crash,
            PhaseTimings::Color { .. } => GameKind::Color,
        }
    }

    fn waiting(&self) -> Duration {
        match self {
            PhaseTimings::Crash { waiting, .. } | PhaseTimings::Color { waiting, .. } => *waiting,
        }
    }

    fn cooldown(&self) -> Duration {
        match self {
            PhaseTimings::Crash { cooldown, .. } | PhaseTimings::Color { cooldown, .. } => *cooldown,
        }
    }

    /// Length of the active phase for a given hidden outcome
    fn active(&self, outcome: &RoundOutcome) -> Duration {
        match (self, outcome) {
            (PhaseTimings::Crash { curve, .. }, RoundOutcome::Crash { multiplier }) => {
                curve.time_to_reach(*multiplier)
            }
            (PhaseTimings::Color { reveal, .. }, _) => *reveal,
            (PhaseTimings::Crash { .. }, RoundOutcome::Color { .. }) => Duration::ZERO,
        }
    }
}

/// Flight of one crash round, as a cash-out is judged against it
#[derive(Debug, Clone, Copy)]
pub struct Flight {
    pub started_at: Duration,
    /// Authoritative crash cut: cash-outs at or after it lose the race
    pub cut: Duration,
    pub crash_point: Multiplier,
    pub curve: MultiplierCurve,
}

impl Flight {
    /// Public multiplier at `at`, two decimals, always below the crash point
    pub fn multiplier_at(&self, at: Duration) -> Multiplier {
        let elapsed = at.saturating_sub(self.started_at);
        let value = Multiplier::floor_from(self.curve.value_at(elapsed));
        let ceiling = self
            .crash_point
            .hundredths()
            .saturating_sub(1)
            .max(Multiplier::ONE.hundredths());
        value.min(Multiplier::from_hundredths(ceiling))
    }
}

/// One cycle of a game. Clock readings are offsets from the engine clock's epoch.
#[derive(Debug, Clone)]
pub struct Round {
    pub id: RoundId,
    pub game: GameKind,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    outcome: RoundOutcome,
    pub opened_at: Duration,
    pub betting_closes_at: Duration,
    active_ends_at: Duration,
    pub resolved_at: Option<Duration>,
    pub next_round_at: Option<Duration>,
    pub forfeited: bool,
}

impl Round {
    /// The outcome, once it is public
    pub fn outcome(&self) -> Option<RoundOutcome> {
        (self.phase == Phase::Resolved && !self.forfeited).then_some(self.outcome)
    }

    pub(crate) fn hidden_outcome(&self) -> RoundOutcome {
        self.outcome
    }
}

/// Phase change applied by [`RoundScheduler::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// WAITING → ACTIVE
    CloseBetting,
    /// ACTIVE → RESOLVED
    Resolve,
    /// Cooldown over, a fresh WAITING round was opened
    OpenNext,
}

pub struct RoundScheduler {
    timings: PhaseTimings,
    generator: OutcomeGenerator,
    current: Round,
}

impl RoundScheduler {
    /// Start with a fresh round `first_id` opened at `now`
    pub fn new(timings: PhaseTimings, mut generator: OutcomeGenerator, first_id: RoundId, now: Duration) -> Self {
        let current = Self::build_round(&timings, &mut generator, first_id, now);
        Self {
            timings,
            generator,
            current,
        }
    }

    /// Resume the bookkeeping of a journaled round. Its clock readings are
    /// gone, so the round is only good for forfeiting.
    pub fn restore(timings: PhaseTimings, generator: OutcomeGenerator, record: &RoundRecord, now: Duration) -> Self {
        let current = Round {
            id: record.round_id,
            game: record.game,
            phase: record.phase,
            created_at: record.created_at,
            outcome: record.outcome,
            opened_at: now,
            betting_closes_at: now,
            active_ends_at: now,
            resolved_at: None,
            next_round_at: None,
            forfeited: record.forfeited,
        };
        Self {
            timings,
            generator,
            current,
        }
    }

    fn build_round(timings: &PhaseTimings, generator: &mut OutcomeGenerator, id: RoundId, now: Duration) -> Round {
        let outcome = generator.draw();
        let betting_closes_at = now + timings.waiting();
        Round {
            id,
            game: timings.game(),
            phase: Phase::Waiting,
            created_at: Utc::now(),
            outcome,
            opened_at: now,
            betting_closes_at,
            active_ends_at: betting_closes_at + timings.active(&outcome),
            resolved_at: None,
            next_round_at: None,
            forfeited: false,
        }
    }

    pub fn current(&self) -> &Round {
        &self.current
    }

    pub fn current_phase(&self) -> Phase {
        self.current.phase
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    /// Instant the next transition is due
    pub fn next_deadline(&self) -> Duration {
        let round = &self.current;
        match round.phase {
            Phase::Waiting => round.betting_closes_at,
            Phase::Active => round.active_ends_at,
            Phase::Resolved => round.next_round_at.unwrap_or(round.active_ends_at),
        }
    }

    /// End of the current phase as observers may know it. The crash cut is
    /// never published ahead of time.
    pub fn phase_deadline(&self) -> Option<Duration> {
        match (self.current.phase, &self.timings) {
            (Phase::Active, PhaseTimings::Crash { .. }) => None,
            _ => Some(self.next_deadline()),
        }
    }

    /// Whole seconds left in the public phase deadline, rounded up
    pub fn seconds_remaining(&self, now: Duration) -> Option<u64> {
        self.phase_deadline()
            .map(|deadline| deadline.saturating_sub(now).as_secs_f64().ceil() as u64)
    }

    /// Apply the next transition if it is due at `now`, returning it with the
    /// instant it took effect
    pub fn advance(&mut self, now: Duration) -> Option<(Transition, Duration)> {
        let due = self.next_deadline();
        if now < due {
            return None;
        }

        match self.current.phase {
            Phase::Waiting => {
                self.current.phase = Phase::Active;
                Some((Transition::CloseBetting, due))
            }
            Phase::Active => {
                self.current.phase = Phase::Resolved;
                self.current.resolved_at = Some(due);
                self.current.next_round_at = Some(due + self.timings.cooldown());
                Some((Transition::Resolve, due))
            }
            Phase::Resolved => {
                let next_id = self.current.id + 1;
                self.current = Self::build_round(&self.timings, &mut self.generator, next_id, now);
                Some((Transition::OpenNext, now))
            }
        }
    }

    /// Resolve the current round with no winners; the next round opens at once
    pub fn forfeit(&mut self, now: Duration) {
        let round = &mut self.current;
        round.phase = Phase::Resolved;
        round.forfeited = true;
        round.resolved_at = Some(now);
        round.next_round_at = Some(now);
    }

    /// Flight of the current crash round
    pub fn flight(&self) -> Option<Flight> {
        let PhaseTimings::Crash { curve, .. } = self.timings else {
            return None;
        };
        Some(Flight {
            started_at: self.current.betting_closes_at,
            cut: self.current.active_ends_at,
            crash_point: self.current.outcome.crash_point()?,
            curve,
        })
    }

    /// Live multiplier while a crash round is in flight
    pub fn multiplier_at(&self, now: Duration) -> Option<Multiplier> {
        if self.current.phase != Phase::Active {
            return None;
        }
        let flight = self.flight()?;
        (now < flight.cut).then(|| flight.multiplier_at(now))
    }
}

/// Drive one engine until shutdown.
///
/// Waits on the phase deadline and the two tick cadences; none of them can be
/// cancelled from outside except through `shutdown`.
pub async fn run(engine: Arc<GameEngine>, mut shutdown: watch::Receiver<bool>) {
    let game = engine.game();
    let mut timer = interval(engine.timer_tick());
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let multiplier_tick = engine.multiplier_tick();
    let mut multiplier = interval(multiplier_tick.unwrap_or(Duration::from_secs(3600)));
    multiplier.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(%game, "Round scheduler started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let wake = engine.until_next_transition().await;

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = timer.tick() => {
                if let Err(e) = engine.on_timer_tick().await {
                    error!(%game, error = %e, "Timer tick failed");
                }
            }
            _ = multiplier.tick(), if multiplier_tick.is_some() => {
                if let Err(e) = engine.on_multiplier_tick().await {
                    error!(%game, error = %e, "Multiplier tick failed");
                }
            }
            _ = sleep(wake) => {
                if let Err(e) = engine.advance().await {
                    error!(%game, error = %e, "Phase transition failed");
                }
            }
        }
    }

    info!(%game, "Round scheduler stopped");
}

/// Run the driver under a supervisor. A panicking driver forfeits the round
/// it interrupted and is started again.
pub fn spawn_supervised(engine: Arc<GameEngine>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let game = engine.game();
        loop {
            let task = tokio::spawn(run(engine.clone(), shutdown.clone()));
            match task.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!(%game, "Round scheduler panicked, forfeiting the interrupted round");
                    match engine.forfeit_current(ForfeitCause::SchedulerFailure).await {
                        Some(report) => warn!(
                            %game,
                            round_id = report.round_id,
                            code = report.code(),
                            "Round forfeited after scheduler failure"
                        ),
                        None => info!(%game, "Scheduler failed during cooldown, no round forfeited"),
                    }
                }
                Err(e) => {
                    debug!(%game, error = %e, "Round scheduler task cancelled");
                    break;
                }
            }
        }
    })
}
