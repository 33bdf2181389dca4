//! Round lifecycle and bet settlement for the crash and color games

pub mod bus;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod outcome;
pub mod pending_pool;
pub mod scheduler;
pub mod settlement;
pub mod types;

pub use bus::{BroadcastBus, BusMessage, Delivery, RoundEvent, RoundSnapshot, Subscription};
pub use engine::{EngineDeps, EngineSettings, ForfeitCause, ForfeitReport, GameEngine};
pub use gateway::{ActionGateway, Command, CommandResult, CommandStatus};
pub use ledger::{BetError, BetLedger, Receipt};
pub use outcome::{MultiplierCurve, OutcomeGenerator};
pub use pending_pool::{PendingPayout, PendingPayoutPool};
pub use scheduler::{spawn_supervised, PhaseTimings, RoundScheduler};
pub use settlement::{InMemoryWallet, RoundSummary, Wallet, WalletError};
pub use types::*;
