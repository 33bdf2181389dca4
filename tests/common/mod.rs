//! Shared harness: engines on a hand-driven clock with scripted outcomes
#![allow(dead_code)]

use ascent::{
    config::{ColorConfig, CrashConfig},
    games::{
        settlement::{TransitionKind, WalletTag},
        ActionGateway, Amount, Color, Command, CommandResult, EngineDeps, EngineSettings, ForfeitReport,
        GameEngine, InMemoryWallet, Multiplier, MultiplierCurve, OutcomeGenerator, RoundOutcome, Wallet,
        WalletError,
    },
    EngineMetrics, ManualClock, MemoryJournal, RoundJournal, RoundRecord,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const INITIAL_BALANCE: Amount = 1_000;

/// In-memory wallet whose credits can be switched off, slowed down, or
/// applied without a reply
pub struct FlakyWallet {
    pub inner: InMemoryWallet,
    credits_down: AtomicBool,
    replies_lost: AtomicBool,
    credit_delay_ms: AtomicU64,
}

impl FlakyWallet {
    pub fn new(initial: Amount) -> Self {
        Self {
            inner: InMemoryWallet::new(initial),
            credits_down: AtomicBool::new(false),
            replies_lost: AtomicBool::new(false),
            credit_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_credits_down(&self, down: bool) {
        self.credits_down.store(down, Ordering::SeqCst);
    }

    /// Apply every call, then answer with a timeout
    pub fn set_replies_lost(&self, lost: bool) {
        self.replies_lost.store(lost, Ordering::SeqCst);
    }

    pub fn set_credit_delay(&self, delay: Duration) {
        self.credit_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn reply(&self, result: Result<Amount, WalletError>) -> Result<Amount, WalletError> {
        if self.replies_lost.load(Ordering::SeqCst) {
            return Err(WalletError::Unavailable("wallet reply timed out".to_string()));
        }
        result
    }
}

#[async_trait]
impl Wallet for FlakyWallet {
    async fn debit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError> {
        let result = self.inner.debit(participant, amount, tag).await;
        self.reply(result)
    }

    async fn credit(&self, participant: &str, amount: Amount, tag: &WalletTag) -> Result<Amount, WalletError> {
        let delay = self.credit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.credits_down.load(Ordering::SeqCst) {
            return Err(WalletError::Unavailable("wallet service down".to_string()));
        }
        let result = self.inner.credit(participant, amount, tag).await;
        self.reply(result)
    }

    async fn balance(&self, participant: &str) -> Result<Amount, WalletError> {
        self.inner.balance(participant).await
    }
}

pub struct Harness {
    pub engine: Arc<GameEngine>,
    pub gateway: Arc<ActionGateway>,
    pub clock: Arc<ManualClock>,
    pub wallet: Arc<FlakyWallet>,
    pub journal: Arc<dyn RoundJournal>,
    pub metrics: Arc<EngineMetrics>,
    pub report: Option<ForfeitReport>,
}

impl Harness {
    pub async fn place(&self, participant: &str, amount: Amount) -> CommandResult {
        self.gateway
            .execute(participant, Command::Place { amount: amount as f64, color: None })
            .await
    }

    pub async fn place_color(&self, participant: &str, amount: Amount, color: &str) -> CommandResult {
        self.gateway
            .execute(
                participant,
                Command::Place {
                    amount: amount as f64,
                    color: Some(color.to_string()),
                },
            )
            .await
    }

    pub async fn cancel(&self, participant: &str) -> CommandResult {
        self.gateway.execute(participant, Command::Cancel).await
    }

    pub async fn cashout(&self, participant: &str) -> CommandResult {
        self.gateway.execute(participant, Command::Cashout).await
    }

    pub async fn balance(&self, participant: &str) -> Amount {
        self.wallet.balance(participant).await.unwrap()
    }

    /// Move the clock to `at` (absolute) and let the engine catch up
    pub async fn run_to(&self, at: Duration) {
        self.clock.set(at);
        self.engine.advance().await.unwrap();
    }
}

fn deps(journal: Arc<dyn RoundJournal>, wallet: Arc<FlakyWallet>) -> (EngineDeps, Arc<ManualClock>, Arc<EngineMetrics>) {
    let clock = Arc::new(ManualClock::new());
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let deps = EngineDeps {
        clock: clock.clone(),
        wallet,
        journal,
        metrics: metrics.clone(),
    };
    (deps, clock, metrics)
}

pub async fn crash_harness(points: &[u64]) -> Harness {
    crash_harness_with(points, Arc::new(MemoryJournal::new()), Arc::new(FlakyWallet::new(INITIAL_BALANCE))).await
}

pub async fn crash_harness_with(points: &[u64], journal: Arc<dyn RoundJournal>, wallet: Arc<FlakyWallet>) -> Harness {
    let outcomes = points
        .iter()
        .map(|&p| RoundOutcome::Crash {
            multiplier: Multiplier::from_hundredths(p),
        })
        .collect();
    let (deps, clock, metrics) = deps(journal.clone(), wallet.clone());
    let (engine, report) = GameEngine::start(
        EngineSettings::crash(&CrashConfig::default()),
        OutcomeGenerator::scripted(outcomes),
        deps,
    )
    .await
    .unwrap();

    Harness {
        gateway: Arc::new(ActionGateway::new(engine.clone())),
        engine,
        clock,
        wallet,
        journal,
        metrics,
        report,
    }
}

pub async fn color_harness_with(colors: &[Color], journal: Arc<dyn RoundJournal>, wallet: Arc<FlakyWallet>) -> Harness {
    let outcomes = colors.iter().map(|&color| RoundOutcome::Color { color }).collect();
    let (deps, clock, metrics) = deps(journal.clone(), wallet.clone());
    let (engine, report) = GameEngine::start(
        EngineSettings::color(&ColorConfig::default()),
        OutcomeGenerator::scripted(outcomes),
        deps,
    )
    .await
    .unwrap();

    Harness {
        gateway: Arc::new(ActionGateway::new(engine.clone())),
        engine,
        clock,
        wallet,
        journal,
        metrics,
        report,
    }
}

/// An archived round's summary must match what the wallet moved for its bets
pub fn assert_matches_wallet(round: &RoundRecord, wallet: &InMemoryWallet) {
    let bets: HashSet<_> = round.bets.iter().map(|b| b.id).collect();
    let (mut debited, mut credited) = (0u128, 0u128);
    for entry in wallet.entries().into_iter().filter(|e| bets.contains(&e.tag.bet_id)) {
        match entry.tag.kind {
            TransitionKind::Stake => debited += entry.amount as u128,
            _ => credited += entry.amount as u128,
        }
    }
    assert_eq!(debited, round.summary.staked, "stakes of round {}", round.round_id);
    assert_eq!(
        credited,
        round.summary.refunded + round.summary.paid_out,
        "credits of round {}",
        round.round_id
    );
}

/// Betting window of the default crash config
pub const CRASH_WAITING: Duration = Duration::from_secs(20);

/// Flight time after which the default curve shows `hundredths`, padded so
/// clock truncation cannot land just short of it
pub fn flight_time(hundredths: u64) -> Duration {
    MultiplierCurve::new(CrashConfig::default().growth_rate).time_to_reach(Multiplier::from_hundredths(hundredths))
        + Duration::from_millis(1)
}

/// First microsecond at or after the crash cut of a round opened at zero
pub fn crash_cut(hundredths: u64) -> Duration {
    let cut = CRASH_WAITING
        + MultiplierCurve::new(CrashConfig::default().growth_rate).time_to_reach(Multiplier::from_hundredths(hundredths));
    Duration::from_micros(((cut.as_nanos() + 999) / 1_000) as u64)
}
