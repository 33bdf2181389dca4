//! Round journal backed by RocksDB
//!
//! Keys are plain strings so the store can be inspected with `ldb`:
//!
//! * `round:open:{game}` the round in progress, rewritten around every wallet call
//! * `round:archive:{game}:{id:020}` resolved rounds, zero-padded so byte order is id order
//! * `round:last_id:{game}` highest id handed out, big-endian `u64`
//! * `payout:pending:{game}:{bet_id}` credits waiting in the outbox

use crate::errors::{AscentResult, StorageError};
use crate::games::pending_pool::PendingPayout;
use crate::games::scheduler::Round;
use crate::games::settlement::RoundSummary;
use crate::games::types::{Bet, GameKind, Phase, RoundId, RoundOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Journaled state of one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub game: GameKind,
    pub round_id: RoundId,
    pub phase: Phase,
    pub outcome: RoundOutcome,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub forfeited: bool,
    pub bets: Vec<Bet>,
    pub summary: RoundSummary,
}

impl RoundRecord {
    pub fn capture(round: &Round, bets: &[Bet]) -> Self {
        Self {
            game: round.game,
            round_id: round.id,
            phase: round.phase,
            outcome: round.hidden_outcome(),
            created_at: round.created_at,
            resolved_at: (round.phase == Phase::Resolved).then(Utc::now),
            forfeited: round.forfeited,
            bets: bets.to_vec(),
            summary: RoundSummary::from_bets(bets),
        }
    }
}

/// Durable storage of open and resolved rounds
pub trait RoundJournal: Send + Sync {
    /// Overwrite the round in progress
    fn save_open_round(&self, record: &RoundRecord) -> AscentResult<()>;

    fn load_open_round(&self, game: GameKind) -> AscentResult<Option<RoundRecord>>;

    /// Move a resolved round to the archive in one write
    fn archive_round(&self, record: &RoundRecord) -> AscentResult<()>;

    fn archived_round(&self, game: GameKind, id: RoundId) -> AscentResult<Option<RoundRecord>>;

    /// Rewrite an archived round after a late wallet answer. The open round is untouched.
    fn amend_archived(&self, record: &RoundRecord) -> AscentResult<()>;

    /// Newest first
    fn recent_rounds(&self, game: GameKind, limit: usize) -> AscentResult<Vec<RoundRecord>>;

    fn last_round_id(&self, game: GameKind) -> AscentResult<Option<RoundId>>;

    fn save_pending_payout(&self, payout: &PendingPayout) -> AscentResult<()>;

    fn remove_pending_payout(&self, game: GameKind, bet_id: &Uuid) -> AscentResult<()>;

    fn pending_payouts(&self, game: GameKind) -> AscentResult<Vec<PendingPayout>>;
}

fn open_key(game: GameKind) -> String {
    format!("round:open:{}", game)
}

fn archive_prefix(game: GameKind) -> String {
    format!("round:archive:{}:", game)
}

fn archive_key(game: GameKind, id: RoundId) -> String {
    format!("{}{:020}", archive_prefix(game), id)
}

fn last_id_key(game: GameKind) -> String {
    format!("round:last_id:{}", game)
}

fn payout_prefix(game: GameKind) -> String {
    format!("payout:pending:{}:", game)
}

fn payout_key(game: GameKind, bet_id: &Uuid) -> String {
    format!("{}{}", payout_prefix(game), bet_id)
}

#[derive(Clone)]
pub struct RocksJournal {
    db: Arc<DB>,
}

impl RocksJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> AscentResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::OpenFailed(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> AscentResult<Option<T>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Values under `prefix`, in key order or reversed
    fn scan<T: for<'de> Deserialize<'de>>(&self, prefix: &str, reverse: bool, limit: usize) -> AscentResult<Vec<T>> {
        // '~' sorts after every digit and hex character used in keys
        let upper = format!("{}~", prefix);
        let mode = if reverse {
            IteratorMode::From(upper.as_bytes(), Direction::Reverse)
        } else {
            IteratorMode::From(prefix.as_bytes(), Direction::Forward)
        };

        let mut values = Vec::new();
        for item in self.db.iterator(mode) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(bincode::deserialize(&value)?);
            if values.len() >= limit {
                break;
            }
        }
        Ok(values)
    }
}

impl RoundJournal for RocksJournal {
    fn save_open_round(&self, record: &RoundRecord) -> AscentResult<()> {
        let mut batch = WriteBatch::default();
        batch.put(open_key(record.game), bincode::serialize(record)?);
        batch.put(last_id_key(record.game), record.round_id.to_be_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn load_open_round(&self, game: GameKind) -> AscentResult<Option<RoundRecord>> {
        self.get(&open_key(game))
    }

    fn archive_round(&self, record: &RoundRecord) -> AscentResult<()> {
        let mut batch = WriteBatch::default();
        batch.put(archive_key(record.game, record.round_id), bincode::serialize(record)?);
        batch.put(last_id_key(record.game), record.round_id.to_be_bytes());
        batch.delete(open_key(record.game));
        self.db.write(batch)?;
        Ok(())
    }

    fn archived_round(&self, game: GameKind, id: RoundId) -> AscentResult<Option<RoundRecord>> {
        self.get(&archive_key(game, id))
    }

    fn amend_archived(&self, record: &RoundRecord) -> AscentResult<()> {
        self.db
            .put(archive_key(record.game, record.round_id), bincode::serialize(record)?)?;
        Ok(())
    }

    fn recent_rounds(&self, game: GameKind, limit: usize) -> AscentResult<Vec<RoundRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.scan(&archive_prefix(game), true, limit)
    }

    fn last_round_id(&self, game: GameKind) -> AscentResult<Option<RoundId>> {
        let bytes = self
            .db
            .get(last_id_key(game).as_bytes())
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        match bytes {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptedData(format!("last round id for {} is {} bytes", game, bytes.len()))
                })?;
                Ok(Some(RoundId::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    fn save_pending_payout(&self, payout: &PendingPayout) -> AscentResult<()> {
        self.db
            .put(payout_key(payout.game, &payout.bet_id), bincode::serialize(payout)?)?;
        Ok(())
    }

    fn remove_pending_payout(&self, game: GameKind, bet_id: &Uuid) -> AscentResult<()> {
        self.db.delete(payout_key(game, bet_id))?;
        Ok(())
    }

    fn pending_payouts(&self, game: GameKind) -> AscentResult<Vec<PendingPayout>> {
        self.scan(&payout_prefix(game), false, usize::MAX)
    }
}

/// Journal that forgets everything on restart (tests and `--in-memory`)
#[derive(Default)]
pub struct MemoryJournal {
    open: DashMap<GameKind, RoundRecord>,
    archive: DashMap<GameKind, BTreeMap<RoundId, RoundRecord>>,
    last_ids: DashMap<GameKind, RoundId>,
    payouts: DashMap<Uuid, PendingPayout>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundJournal for MemoryJournal {
    fn save_open_round(&self, record: &RoundRecord) -> AscentResult<()> {
        self.open.insert(record.game, record.clone());
        self.last_ids.insert(record.game, record.round_id);
        Ok(())
    }

    fn load_open_round(&self, game: GameKind) -> AscentResult<Option<RoundRecord>> {
        Ok(self.open.get(&game).map(|r| r.clone()))
    }

    fn archive_round(&self, record: &RoundRecord) -> AscentResult<()> {
        self.archive
            .entry(record.game)
            .or_default()
            .insert(record.round_id, record.clone());
        self.last_ids.insert(record.game, record.round_id);
        self.open.remove(&record.game);
        Ok(())
    }

    fn archived_round(&self, game: GameKind, id: RoundId) -> AscentResult<Option<RoundRecord>> {
        Ok(self.archive.get(&game).and_then(|rounds| rounds.get(&id).cloned()))
    }

    fn amend_archived(&self, record: &RoundRecord) -> AscentResult<()> {
        self.archive
            .entry(record.game)
            .or_default()
            .insert(record.round_id, record.clone());
        Ok(())
    }

    fn recent_rounds(&self, game: GameKind, limit: usize) -> AscentResult<Vec<RoundRecord>> {
        Ok(self
            .archive
            .get(&game)
            .map(|rounds| rounds.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn last_round_id(&self, game: GameKind) -> AscentResult<Option<RoundId>> {
        Ok(self.last_ids.get(&game).map(|id| *id))
    }

    fn save_pending_payout(&self, payout: &PendingPayout) -> AscentResult<()> {
        self.payouts.insert(payout.bet_id, payout.clone());
        Ok(())
    }

    fn remove_pending_payout(&self, _game: GameKind, bet_id: &Uuid) -> AscentResult<()> {
        self.payouts.remove(bet_id);
        Ok(())
    }

    fn pending_payouts(&self, game: GameKind) -> AscentResult<Vec<PendingPayout>> {
        let mut payouts: Vec<PendingPayout> = self
            .payouts
            .iter()
            .filter(|p| p.game == game)
            .map(|p| p.value().clone())
            .collect();
        payouts.sort_by_key(|p| p.queued_at);
        Ok(payouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{BetState, Color, Multiplier};
    use tempfile::TempDir;

    fn record(game: GameKind, round_id: RoundId) -> RoundRecord {
        let mut bet = Bet::new(round_id, "alice".to_string(), 100, None);
        bet.state = BetState::CashedOut;
        bet.multiplier = Some(Multiplier::from_hundredths(250));
        bet.payout = 250;
        let bets = vec![bet];
        RoundRecord {
            game,
            round_id,
            phase: Phase::Resolved,
            outcome: RoundOutcome::Crash {
                multiplier: Multiplier::from_hundredths(300),
            },
            created_at: Utc::now(),
            resolved_at: Some(Utc::now()),
            forfeited: false,
            summary: RoundSummary::from_bets(&bets),
            bets,
        }
    }

    fn exercise(journal: &dyn RoundJournal) {
        assert_eq!(journal.last_round_id(GameKind::Crash).unwrap(), None);

        let mut open = record(GameKind::Crash, 1);
        open.phase = Phase::Waiting;
        journal.save_open_round(&open).unwrap();
        assert_eq!(journal.load_open_round(GameKind::Crash).unwrap(), Some(open.clone()));
        assert_eq!(journal.load_open_round(GameKind::Color).unwrap(), None);
        assert_eq!(journal.last_round_id(GameKind::Crash).unwrap(), Some(1));

        for id in 1..=12 {
            journal.archive_round(&record(GameKind::Crash, id)).unwrap();
        }
        journal.archive_round(&record(GameKind::Color, 99)).unwrap();

        assert_eq!(journal.load_open_round(GameKind::Crash).unwrap(), None);
        let recent = journal.recent_rounds(GameKind::Crash, 10).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].round_id, 12);
        assert_eq!(recent[9].round_id, 3);
        assert_eq!(journal.recent_rounds(GameKind::Color, 10).unwrap().len(), 1);
        assert_eq!(journal.last_round_id(GameKind::Crash).unwrap(), Some(12));

        // Amending an archived round leaves the open round alone
        journal.save_open_round(&open).unwrap();
        let mut amended = journal.archived_round(GameKind::Crash, 4).unwrap().unwrap();
        amended.bets.clear();
        amended.summary = RoundSummary::from_bets(&amended.bets);
        journal.amend_archived(&amended).unwrap();
        assert_eq!(journal.archived_round(GameKind::Crash, 4).unwrap(), Some(amended));
        assert_eq!(journal.archived_round(GameKind::Crash, 40).unwrap(), None);
        assert!(journal.load_open_round(GameKind::Crash).unwrap().is_some());
        assert_eq!(journal.recent_rounds(GameKind::Crash, 20).unwrap().len(), 12);

        let mut bet = Bet::new(99, "bob".to_string(), 40, Some(Color::Green));
        bet.state = BetState::Won;
        bet.payout = 80;
        let payout = PendingPayout::for_bet(GameKind::Color, &bet);
        journal.save_pending_payout(&payout).unwrap();
        assert_eq!(journal.pending_payouts(GameKind::Color).unwrap(), vec![payout.clone()]);
        assert!(journal.pending_payouts(GameKind::Crash).unwrap().is_empty());
        journal.remove_pending_payout(GameKind::Color, &payout.bet_id).unwrap();
        assert!(journal.pending_payouts(GameKind::Color).unwrap().is_empty());
    }

    #[test]
    fn test_memory_journal() {
        exercise(&MemoryJournal::new());
    }

    #[test]
    fn test_rocks_journal() {
        let dir = TempDir::new().unwrap();
        exercise(&RocksJournal::open(dir.path()).unwrap());
    }
}
