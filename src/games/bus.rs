//! Ordered fan-out of round events to observers.
//!
//! The engine publishes only while holding its round lock, so sequence numbers
//! follow round order. A subscription is created under the same lock together
//! with a snapshot, which puts every later event strictly after the snapshot.

use crate::games::types::{BetView, Color, GameKind, Multiplier, Phase, RoundId, RoundOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Result shown in the recent-results strip
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentResult {
    pub round_id: RoundId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_label: Option<Color>,
    pub forfeited: bool,
}

impl RecentResult {
    pub fn new(round_id: RoundId, outcome: Option<RoundOutcome>, forfeited: bool) -> Self {
        Self {
            round_id,
            final_multiplier: outcome.and_then(|o| o.crash_point()),
            result_label: outcome.and_then(|o| o.color()),
            forfeited,
        }
    }
}

/// Everything a late joiner needs to render the current round
#[derive(Debug, Clone, Serialize)]
pub struct RoundSnapshot {
    pub game: GameKind,
    pub round_id: RoundId,
    pub phase: Phase,
    pub seconds_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Multiplier>,
    /// Only once the round is resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RecentResult>,
    pub bets: Vec<BetView>,
    pub recent: Vec<RecentResult>,
    /// Sequence number of the last event folded into this snapshot
    pub seq: u64,
}

/// Server → observer event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    Snapshot {
        snapshot: RoundSnapshot,
    },
    PhaseTick {
        round_id: RoundId,
        phase: Phase,
        /// `None` while a crash round is in flight
        seconds_remaining: Option<u64>,
    },
    MultiplierTick {
        round_id: RoundId,
        multiplier: Multiplier,
        elapsed_ms: u64,
    },
    PhaseChanged {
        round_id: RoundId,
        phase: Phase,
    },
    Outcome {
        round_id: RoundId,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_multiplier: Option<Multiplier>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_label: Option<Color>,
    },
    Bets {
        round_id: RoundId,
        bets: Vec<BetView>,
    },
    RoundForfeited {
        round_id: RoundId,
        code: &'static str,
        message: String,
    },
}

/// Event with its position in the game's stream
#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub game: GameKind,
    pub seq: u64,
    pub event: RoundEvent,
}

pub struct BroadcastBus {
    game: GameKind,
    sender: broadcast::Sender<Arc<BusMessage>>,
    seq: AtomicU64,
}

impl BroadcastBus {
    pub fn new(game: GameKind, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            game,
            sender,
            seq: AtomicU64::new(0),
        }
    }

    /// Stamp and send. Having no observers is not an error.
    pub fn publish(&self, event: RoundEvent) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.sender.send(Arc::new(BusMessage {
            game: self.game,
            seq,
            event,
        }));
        seq
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn attach(&self, snapshot: RoundSnapshot) -> Subscription {
        Subscription {
            snapshot,
            receiver: self.sender.subscribe(),
        }
    }
}

/// What an observer gets next
#[derive(Debug)]
pub enum Delivery {
    Event(Arc<BusMessage>),
    /// The observer fell behind and `n` events were dropped; resubscribe
    Lagged(u64),
    Closed,
}

/// Snapshot plus the ordered stream of everything after it
pub struct Subscription {
    pub snapshot: RoundSnapshot,
    receiver: broadcast::Receiver<Arc<BusMessage>>,
}

impl Subscription {
    pub async fn next(&mut self) -> Delivery {
        match self.receiver.recv().await {
            Ok(message) => Delivery::Event(message),
            Err(RecvError::Lagged(n)) => Delivery::Lagged(n),
            Err(RecvError::Closed) => Delivery::Closed,
        }
    }

    /// Next already-published event, without waiting
    pub fn try_next(&mut self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(message) => Some(Delivery::Event(message)),
            Err(TryRecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(TryRecvError::Closed) => Some(Delivery::Closed),
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Drain every queued event
    pub fn drain(&mut self) -> Vec<Arc<BusMessage>> {
        let mut events = Vec::new();
        while let Some(Delivery::Event(message)) = self.try_next() {
            events.push(message);
        }
        events
    }
}
