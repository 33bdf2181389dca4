use crate::games::settlement::TransitionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Participant identifier (assigned by the external auth layer)
pub type ParticipantId = String;

/// Wallet amount in minor units
pub type Amount = u64;

/// Monotonic round identifier, unique per game
pub type RoundId = u64;

/// Games sharing the round/bet lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    /// Rising multiplier that crashes at a hidden point
    Crash,
    /// Fixed-interval weighted color draw
    Color,
}

impl GameKind {
    pub fn all() -> [GameKind; 2] {
        [GameKind::Crash, GameKind::Color]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Crash => "crash",
            GameKind::Color => "color",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round phase. Moves forward only: WAITING → ACTIVE → RESOLVED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Waiting,
    Active,
    Resolved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Waiting => write!(f, "waiting"),
            Phase::Active => write!(f, "active"),
            Phase::Resolved => write!(f, "resolved"),
        }
    }
}

/// Color game labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Red => write!(f, "red"),
            Color::Green => write!(f, "green"),
            Color::Violet => write!(f, "violet"),
        }
    }
}

impl std::str::FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "violet" => Ok(Color::Violet),
            other => Err(format!("unknown color '{}'", other)),
        }
    }
}

/// Multiplier with two decimal places, stored in hundredths.
///
/// Serialized as a plain decimal (`2.5`) so observers never see the internal
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", from = "f64")]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Multiplier(hundredths)
    }

    pub fn hundredths(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Truncate a curve value to two decimals.
    ///
    /// The small bias absorbs `exp`/`ln` rounding so that a value which is
    /// mathematically 2.50 does not come out as 2.49.
    pub fn floor_from(value: f64) -> Self {
        if !value.is_finite() || value < 1.0 {
            return Multiplier::ONE;
        }
        Multiplier((value * 100.0 + 1e-6).floor() as u64)
    }

    /// Nearest two-decimal value (configuration input)
    pub fn round_from(value: f64) -> Self {
        if !value.is_finite() || value < 0.0 {
            return Multiplier(0);
        }
        Multiplier((value * 100.0).round() as u64)
    }

    /// `amount × multiplier`, floored to whole minor units
    pub fn apply(&self, amount: Amount) -> Amount {
        let product = amount as u128 * self.0 as u128 / 100;
        product.min(Amount::MAX as u128) as Amount
    }
}

impl From<Multiplier> for f64 {
    fn from(m: Multiplier) -> f64 {
        m.as_f64()
    }
}

impl From<f64> for Multiplier {
    fn from(value: f64) -> Self {
        Multiplier::round_from(value)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

/// Hidden per-round result, fixed at round creation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundOutcome {
    Crash { multiplier: Multiplier },
    Color { color: Color },
}

impl RoundOutcome {
    pub fn crash_point(&self) -> Option<Multiplier> {
        match self {
            RoundOutcome::Crash { multiplier } => Some(*multiplier),
            RoundOutcome::Color { .. } => None,
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            RoundOutcome::Color { color } => Some(*color),
            RoundOutcome::Crash { .. } => None,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Crash { multiplier } => write!(f, "crash @ {}", multiplier),
            RoundOutcome::Color { color } => write!(f, "{}", color),
        }
    }
}

/// Bet lifecycle state.
///
/// `Idle` is what a participant without a bet in the current round reports;
/// stored bets are never idle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetState {
    Idle,
    Placed,
    Canceled,
    CashedOut,
    Won,
    Lost,
}

impl BetState {
    /// Wallet transition that moves money into this state, if any
    pub fn transition(&self) -> Option<TransitionKind> {
        match self {
            BetState::Placed => Some(TransitionKind::Stake),
            BetState::Canceled => Some(TransitionKind::Refund),
            BetState::CashedOut => Some(TransitionKind::Cashout),
            BetState::Won => Some(TransitionKind::Payout),
            BetState::Idle | BetState::Lost => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BetState::Canceled | BetState::CashedOut | BetState::Won | BetState::Lost
        )
    }
}

impl fmt::Display for BetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BetState::Idle => "idle",
            BetState::Placed => "placed",
            BetState::Canceled => "canceled",
            BetState::CashedOut => "cashed_out",
            BetState::Won => "won",
            BetState::Lost => "lost",
        };
        f.write_str(label)
    }
}

/// A participant's wager in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: Uuid,
    pub round_id: RoundId,
    pub participant: ParticipantId,
    pub amount: Amount,
    /// Color game pick
    pub choice: Option<Color>,
    pub state: BetState,
    /// Cash-out multiplier (crash) or winning payout multiplier (color)
    pub multiplier: Option<Multiplier>,
    /// Amount credited back to the wallet by the terminal transition
    pub payout: Amount,
    /// Journaled in its current state, wallet call not confirmed yet
    pub pending: bool,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn new(round_id: RoundId, participant: ParticipantId, amount: Amount, choice: Option<Color>) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            participant,
            amount,
            choice,
            state: BetState::Placed,
            multiplier: None,
            payout: 0,
            pending: false,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Wallet call this bet still waits on
    pub fn outstanding(&self) -> Option<TransitionKind> {
        if !self.pending {
            return None;
        }
        match self.state {
            // Swept before its stake was answered
            BetState::Lost => Some(TransitionKind::Stake),
            state => state.transition(),
        }
    }

    pub fn view(&self) -> BetView {
        BetView {
            participant: self.participant.clone(),
            amount: self.amount,
            state: self.state,
            cashout_multiplier: self.multiplier,
            choice: self.choice,
        }
    }
}

/// Public projection of a bet for observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetView {
    pub participant: ParticipantId,
    pub amount: Amount,
    pub state: BetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cashout_multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<Color>,
}
