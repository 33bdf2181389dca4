//! Ascent - Round Lifecycle and Bet Settlement Engine
//!
//! Runs timed wagering rounds for two games: a rising multiplier that crashes
//! at a hidden point, and a fixed-interval weighted color draw. Each round
//! moves WAITING → ACTIVE → RESOLVED on one authoritative clock, and every bet
//! reaches exactly one terminal state with the wallet moved exactly once.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod games;
pub mod metrics;
pub mod storage;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AscentConfig, ConfigLoader};
pub use errors::{AscentError, AscentResult};
pub use games::{
    ActionGateway, BetError, Command, CommandResult, EngineDeps, EngineSettings, GameEngine,
    GameKind, InMemoryWallet, OutcomeGenerator, Wallet,
};
pub use metrics::EngineMetrics;
pub use storage::{MemoryJournal, RocksJournal, RoundJournal, RoundRecord};
