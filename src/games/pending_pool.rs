use crate::games::settlement::{TransitionKind, WalletTag};
use crate::games::types::{Amount, Bet, GameKind, ParticipantId, RoundId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Wallet call owed for a bet that the wallet has not answered yet: a credit,
/// or a stake whose debit timed out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayout {
    pub game: GameKind,
    pub round_id: RoundId,
    pub bet_id: Uuid,
    pub kind: TransitionKind,
    pub participant: ParticipantId,
    pub amount: Amount,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
}

impl PendingPayout {
    pub fn for_bet(game: GameKind, bet: &Bet) -> Self {
        let kind = bet.outstanding().unwrap_or(TransitionKind::Payout);
        Self {
            game,
            round_id: bet.round_id,
            bet_id: bet.id,
            kind,
            participant: bet.participant.clone(),
            amount: match kind {
                TransitionKind::Stake => bet.amount,
                _ => bet.payout,
            },
            attempts: 0,
            queued_at: Utc::now(),
        }
    }

    /// Same tag as the first attempt, so a late success is never paid twice
    pub fn tag(&self) -> WalletTag {
        WalletTag::new(self.bet_id, self.kind)
    }
}

/// Thread-safe outbox of wallet calls waiting for the wallet to come back
pub struct PendingPayoutPool {
    /// Map of bet_id -> payout
    pending: Arc<DashMap<Uuid, PendingPayout>>,
}

impl PendingPayoutPool {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Queue a call. A bet already queued for the same transition keeps its
    /// attempt count; a different transition replaces it.
    pub fn add_pending(&self, payout: PendingPayout) {
        let mut entry = self.pending.entry(payout.bet_id).or_insert_with(|| payout.clone());
        if entry.kind != payout.kind {
            *entry = payout;
        }
    }

    /// Drop a call once the wallet answered it
    pub fn complete(&self, bet_id: &Uuid) -> Option<PendingPayout> {
        self.pending.remove(bet_id).map(|(_, payout)| payout)
    }

    /// Drop the entry only if it is still queued for `kind`
    pub fn complete_call(&self, bet_id: &Uuid, kind: TransitionKind) -> bool {
        self.pending.remove_if(bet_id, |_, p| p.kind == kind).is_some()
    }

    pub fn kind_of(&self, bet_id: &Uuid) -> Option<TransitionKind> {
        self.pending.get(bet_id).map(|p| p.kind)
    }

    /// Count a failed retry and return the new attempt number
    pub fn record_attempt(&self, bet_id: &Uuid) -> Option<u32> {
        self.pending.get_mut(bet_id).map(|mut payout| {
            payout.attempts += 1;
            payout.attempts
        })
    }

    /// Copy of the queue, oldest first
    pub fn snapshot(&self) -> Vec<PendingPayout> {
        let mut payouts: Vec<PendingPayout> = self.pending.iter().map(|e| e.value().clone()).collect();
        payouts.sort_by_key(|p| p.queued_at);
        payouts
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, bet_id: &Uuid) -> bool {
        self.pending.contains_key(bet_id)
    }
}

impl Default for PendingPayoutPool {
    fn default() -> Self {
        Self::new()
    }
}
