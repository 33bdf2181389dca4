//! Round journal across restarts
//! An engine that stops mid-round must forfeit that round on the next start,
//! keep every settled bet as it was, and never pay a forfeited bet.

mod common;

use ascent::games::{BetState, Phase};
use ascent::{MemoryJournal, RocksJournal, RoundJournal};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

/// Round 1 in flight: alice still riding, bob cashed out at 1.50
async fn run_until_interrupted(journal: Arc<dyn RoundJournal>, wallet: Arc<FlakyWallet>) {
    let h = crash_harness_with(&[500], journal, wallet).await;
    assert!(h.report.is_none());

    assert!(h.place("alice", 100).await.is_success());
    assert!(h.place("bob", 100).await.is_success());
    h.run_to(CRASH_WAITING + flight_time(150)).await;

    let bob = h.cashout("bob").await;
    assert!(bob.is_success(), "{}", bob.message);
    assert_eq!(bob.new_balance, Some(1_050));
    println!("Stopping engine mid-flight of round 1");
}

async fn assert_forfeited_on_restart(h: &Harness) {
    let report = h.report.as_ref().expect("restart should forfeit round 1");
    println!("Forfeit report: {:?}", report);
    assert_eq!(report.round_id, 1);
    assert_eq!(report.bets_lost, 1);
    assert_eq!(report.code(), "SCHEDULER_RESTART_FORFEIT");

    // Numbering continues with a fresh betting window
    let snapshot = h.engine.snapshot().await;
    assert_eq!((snapshot.round_id, snapshot.phase), (2, Phase::Waiting));
    assert!(snapshot.recent[0].forfeited);
    assert_eq!(snapshot.recent[0].final_multiplier, None);

    let history = h.engine.history(5).unwrap();
    assert_eq!(history.len(), 1);
    let round = &history[0];
    assert!(round.forfeited);
    assert_eq!(round.outcome.crash_point().map(|m| m.hundredths()), Some(500));
    assert_matches_wallet(round, &h.wallet.inner);

    let alice = round.bets.iter().find(|b| b.participant == "alice").unwrap();
    let bob = round.bets.iter().find(|b| b.participant == "bob").unwrap();
    assert_eq!((alice.state, alice.payout), (BetState::Lost, 0));
    assert_eq!((bob.state, bob.payout), (BetState::CashedOut, 150));

    assert_eq!(h.balance("alice").await, 900);
    assert_eq!(h.balance("bob").await, 1_050);

    let rendered = h.metrics.render().unwrap();
    assert!(rendered.contains("ascent_rounds_forfeited_total{game=\"crash\"} 1"));

    // The new round takes bets normally
    assert!(h.place("alice", 10).await.is_success());
}

#[tokio::test]
async fn test_restart_forfeits_unresolved_round_in_memory() {
    let journal: Arc<dyn RoundJournal> = Arc::new(MemoryJournal::new());
    let wallet = Arc::new(FlakyWallet::new(INITIAL_BALANCE));

    // === PHASE 1: play until interrupted ===
    println!("\n=== PHASE 1: Interrupted round ===");
    run_until_interrupted(journal.clone(), wallet.clone()).await;

    // === PHASE 2: restart on the same journal ===
    println!("\n=== PHASE 2: Restart ===");
    let h = crash_harness_with(&[500], journal, wallet).await;
    assert_forfeited_on_restart(&h).await;
}

#[tokio::test]
async fn test_restart_forfeits_unresolved_round_rocksdb() {
    let dir = TempDir::new().unwrap();
    let wallet = Arc::new(FlakyWallet::new(INITIAL_BALANCE));

    // === PHASE 1: play until interrupted, then close the database ===
    println!("\n=== PHASE 1: Interrupted round ===");
    {
        let journal: Arc<dyn RoundJournal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
        run_until_interrupted(journal, wallet.clone()).await;
    }

    // === PHASE 2: reopen the database ===
    println!("\n=== PHASE 2: Restart from disk ===");
    let journal: Arc<dyn RoundJournal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
    let h = crash_harness_with(&[500], journal, wallet.clone()).await;
    assert_forfeited_on_restart(&h).await;
    drop(h);

    // === PHASE 3: stop again with a bet on round 2 ===
    println!("\n=== PHASE 3: Second restart ===");
    let journal: Arc<dyn RoundJournal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
    let h = crash_harness_with(&[500], journal, wallet).await;
    // Round 2 was open with one bet: it is the one forfeited now
    let report = h.report.as_ref().unwrap();
    assert_eq!((report.round_id, report.bets_lost), (2, 1));
    assert_eq!(h.engine.snapshot().await.round_id, 3);
    assert_eq!(h.engine.history(10).unwrap().len(), 2);
    assert_eq!(h.balance("alice").await, 890);
}

#[tokio::test]
async fn test_outbox_survives_restart_rocksdb() {
    let dir = TempDir::new().unwrap();
    let wallet = Arc::new(FlakyWallet::new(INITIAL_BALANCE));

    {
        let journal: Arc<dyn RoundJournal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
        let h = color_harness_with(&[ascent::games::Color::Green], journal, wallet.clone()).await;
        assert!(h.place_color("carol", 100, "green").await.is_success());
        wallet.set_credits_down(true);
        h.run_to(std::time::Duration::from_secs(31)).await;
        assert_eq!(h.engine.pending_credits().len(), 1);
    }

    let journal: Arc<dyn RoundJournal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
    assert_eq!(journal.pending_payouts(ascent::games::GameKind::Color).unwrap().len(), 1);

    wallet.set_credits_down(false);
    let h = color_harness_with(&[ascent::games::Color::Red], journal.clone(), wallet).await;
    assert!(h.report.is_none());
    assert_eq!(h.engine.retry_pending_credits().await.unwrap(), 1);
    assert_eq!(h.balance("carol").await, 1_100);
    assert!(journal.pending_payouts(ascent::games::GameKind::Color).unwrap().is_empty());
}
