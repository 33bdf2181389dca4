//! Round lifecycle and settlement, driven end to end through the gateway

mod common;

use ascent::games::{
    settlement::TransitionKind, BetState, Color, CommandStatus, Delivery, ForfeitCause, GameKind,
    Multiplier, Phase, RoundEvent,
};
use ascent::{Clock, MemoryJournal};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cash_out_at_two_and_a_half_credits_250() {
    let h = crash_harness(&[500]).await;

    let placed = h.place("alice", 100).await;
    assert!(placed.is_success(), "{}", placed.message);
    assert_eq!(placed.new_balance, Some(900));

    h.run_to(CRASH_WAITING + flight_time(250)).await;
    assert_eq!(h.engine.current_phase().await, Phase::Active);

    let cashed = h.cashout("alice").await;
    assert!(cashed.is_success(), "{}", cashed.message);
    assert_eq!(cashed.new_balance, Some(1_150));
    let bet = cashed.bet.unwrap();
    assert_eq!(bet.state, BetState::CashedOut);
    assert_eq!(bet.cashout_multiplier, Some(Multiplier::from_hundredths(250)));

    // Terminal-once: the replay moves nothing
    let again = h.cashout("alice").await;
    assert_eq!(again.code, Some("ALREADY_SETTLED"));
    assert_eq!(again.new_balance, None);
    assert_eq!(h.balance("alice").await, 1_150);
}

#[tokio::test]
async fn test_crash_at_one_eighty_loses_the_stake() {
    let h = crash_harness(&[180]).await;
    assert!(h.place("alice", 100).await.is_success());

    // Inside the cooldown after the crash
    h.run_to(crash_cut(180) + Duration::from_secs(1)).await;
    let bet = h.engine.bet_for("alice").await.unwrap();
    assert_eq!(bet.state, BetState::Lost);
    assert_eq!(bet.payout, 0);
    assert_eq!(h.balance("alice").await, 900);

    let late = h.cashout("alice").await;
    assert_eq!(late.code, Some("RACE_LOST"));

    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Resolved);
    assert_eq!(
        snapshot.outcome.and_then(|o| o.final_multiplier),
        Some(Multiplier::from_hundredths(180))
    );

    // Cooldown over: round 2 opens and round 1 is archived
    h.run_to(crash_cut(180) + Duration::from_secs(4)).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!((snapshot.round_id, snapshot.phase), (2, Phase::Waiting));

    let history = h.engine.history(5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].bets[0].state, BetState::Lost);
    assert_eq!(history[0].summary.retained, 100);
    assert_matches_wallet(&history[0], &h.wallet.inner);
}

#[tokio::test]
async fn test_cash_out_just_before_the_cut_wins_and_at_the_cut_loses() {
    let h = crash_harness(&[200]).await;
    for who in ["alice", "bob", "carol"] {
        assert!(h.place(who, 100).await.is_success());
    }

    let cut = crash_cut(200);
    h.clock.set(cut - Duration::from_micros(1));
    let early = h.cashout("alice").await;
    assert!(early.is_success(), "{}", early.message);
    let bet = early.bet.unwrap();
    // Never at or above the crash point
    assert_eq!(bet.cashout_multiplier, Some(Multiplier::from_hundredths(199)));
    assert_eq!(h.balance("alice").await, 900 + 199);

    // Two requests racing exactly at the cut
    h.clock.set(cut);
    let (bob, carol) = tokio::join!(h.cashout("bob"), h.cashout("carol"));
    assert_eq!(bob.code, Some("RACE_LOST"));
    assert_eq!(carol.code, Some("RACE_LOST"));
    assert_eq!(h.balance("bob").await, 900);
    assert_eq!(h.balance("carol").await, 900);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commands_settle_a_bet_once() {
    let h = Arc::new(crash_harness(&[900]).await);

    // Waiting: two cancels and a cash-out race
    assert!(h.place("alice", 100).await.is_success());
    let tasks: Vec<_> = ["cancel", "cancel", "cashout"]
        .into_iter()
        .map(|command| {
            let h = h.clone();
            tokio::spawn(async move {
                match command {
                    "cancel" => h.cancel("alice").await,
                    _ => h.cashout("alice").await,
                }
            })
        })
        .collect();
    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_success() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(h.balance("alice").await, 1_000);

    // Active: cancel and two cash-outs race
    assert!(h.place("bob", 100).await.is_success());
    h.run_to(CRASH_WAITING + flight_time(300)).await;
    let (a, b, c) = tokio::join!(h.cashout("bob"), h.cashout("bob"), h.cancel("bob"));
    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);
    for rejected in results.iter().filter(|r| !r.is_success()) {
        assert!(
            matches!(rejected.code, Some("ALREADY_SETTLED") | Some("WRONG_PHASE")),
            "{:?}",
            rejected.code
        );
    }

    let cashouts = h
        .wallet
        .inner
        .entries()
        .into_iter()
        .filter(|e| e.participant == "bob" && e.tag.kind == TransitionKind::Cashout)
        .count();
    assert_eq!(cashouts, 1);
    assert_eq!(h.balance("bob").await, 900 + 300);
}

#[tokio::test]
async fn test_rejections_leave_round_and_wallet_unchanged() {
    let h = crash_harness(&[400]).await;

    assert!(h.place("alice", 100).await.is_success());
    assert_eq!(h.place("alice", 100).await.code, Some("DUPLICATE_BET"));
    assert!(h.cancel("alice").await.is_success());
    // A canceled bet does not block a new one in the same window
    assert!(h.place("alice", 40).await.is_success());
    assert_eq!(h.balance("alice").await, 960);

    assert_eq!(h.place("eve", 5_000).await.code, Some("INSUFFICIENT_BALANCE"));
    assert_eq!(h.balance("eve").await, 1_000);
    assert_eq!(h.place("eve", 0).await.code, Some("INVALID_AMOUNT"));
    assert_eq!(h.cashout("alice").await.code, Some("WRONG_PHASE"));
    assert_eq!(h.cancel("dave").await.code, Some("NO_ACTIVE_BET"));

    h.run_to(CRASH_WAITING + Duration::from_secs(1)).await;
    let late = h.place("carol", 100).await;
    assert_eq!(late.status, CommandStatus::Error);
    assert_eq!(late.code, Some("WRONG_PHASE"));
    assert_eq!(h.cancel("alice").await.code, Some("WRONG_PHASE"));
    assert_eq!(h.balance("carol").await, 1_000);

    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.bets.len(), 2);
    assert_eq!(h.metrics.command_count(GameKind::Crash, "place", "WRONG_PHASE"), 1);
}

#[tokio::test]
async fn test_value_is_conserved_across_rounds() {
    let h = crash_harness(&[300, 100, 150]).await;
    let players = ["p0", "p1", "p2", "p3", "p4"];

    // Round 1: one cash-out at 2.00, one cancel, the rest ride to 3.00
    for p in players {
        assert!(h.place(p, 100).await.is_success());
    }
    assert!(h.cancel("p1").await.is_success());
    h.run_to(CRASH_WAITING + flight_time(200)).await;
    assert!(h.cashout("p0").await.is_success());
    h.run_to(Duration::from_secs(60)).await;

    // Round 2 busts at 1.00: nobody can cash out
    for p in players {
        assert!(h.place(p, 50).await.is_success());
    }
    h.run_to(Duration::from_secs(80)).await;
    assert_eq!(h.cashout("p2").await.code, Some("RACE_LOST"));
    h.run_to(Duration::from_secs(90)).await;

    // Round 3 crashes at 1.50 after one cash-out at 1.20
    for p in ["p3", "p4"] {
        assert!(h.place(p, 200).await.is_success());
    }
    h.run_to(Duration::from_secs(110) + flight_time(120)).await;
    assert!(h.cashout("p3").await.is_success());
    h.run_to(Duration::from_secs(150)).await;

    let history = h.engine.history(10).unwrap();
    assert_eq!(history.iter().map(|r| r.round_id).collect::<Vec<_>>(), vec![3, 2, 1]);
    for round in &history {
        assert_eq!(round.summary.open, 0);
        assert_matches_wallet(round, &h.wallet.inner);
    }

    let house_net: i128 = history.iter().map(|r| r.summary.house_net()).sum();
    let mut player_net: i128 = 0;
    for p in players {
        player_net += INITIAL_BALANCE as i128 - h.balance(p).await as i128;
    }
    assert_eq!(player_net, house_net);
}

#[tokio::test]
async fn test_color_round_pays_the_winning_color() {
    let h = color_harness_with(
        &[Color::Red],
        Arc::new(MemoryJournal::new()),
        Arc::new(FlakyWallet::new(INITIAL_BALANCE)),
    )
    .await;

    assert!(h.place_color("alice", 100, "red").await.is_success());
    assert!(h.place_color("bob", 100, "green").await.is_success());
    assert!(h.place_color("carol", 100, "Violet").await.is_success());
    assert_eq!(h.place("dave", 100).await.code, Some("INVALID_CHOICE"));
    assert_eq!(h.cashout("alice").await.code, Some("UNSUPPORTED_COMMAND"));

    // Reveal phase: betting closed, outcome still hidden
    h.run_to(Duration::from_secs(27)).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Active);
    assert_eq!(snapshot.seconds_remaining, Some(3));
    assert!(snapshot.outcome.is_none());

    h.run_to(Duration::from_secs(31)).await;
    let snapshot = h.engine.snapshot().await;
    assert_eq!(snapshot.outcome.and_then(|o| o.result_label), Some(Color::Red));

    let alice = h.engine.bet_for("alice").await.unwrap();
    assert_eq!((alice.state, alice.payout, alice.pending), (BetState::Won, 200, false));
    assert_eq!(h.engine.bet_for("bob").await.unwrap().state, BetState::Lost);
    assert_eq!(h.balance("alice").await, 1_100);
    assert_eq!(h.balance("bob").await, 900);
    assert_eq!(h.balance("carol").await, 900);
}

#[tokio::test]
async fn test_payout_outage_goes_to_the_outbox_and_is_retried() {
    let journal = Arc::new(MemoryJournal::new());
    let wallet = Arc::new(FlakyWallet::new(INITIAL_BALANCE));
    let h = color_harness_with(&[Color::Violet], journal.clone(), wallet.clone()).await;

    assert!(h.place_color("alice", 100, "violet").await.is_success());
    wallet.set_credits_down(true);
    h.run_to(Duration::from_secs(31)).await;

    let alice = h.engine.bet_for("alice").await.unwrap();
    assert_eq!((alice.state, alice.payout, alice.pending), (BetState::Won, 150, true));
    assert_eq!(h.engine.pending_credits().len(), 1);
    assert_eq!(h.balance("alice").await, 900);

    h.engine.on_timer_tick().await.unwrap();
    assert_eq!(h.engine.pending_credits()[0].attempts, 2);

    // The outbox is journaled: a restarted engine picks it up
    let restarted = color_harness_with(&[Color::Red], journal.clone(), wallet.clone()).await;
    assert!(restarted.report.is_none());
    assert_eq!(restarted.engine.pending_credits().len(), 1);

    wallet.set_credits_down(false);
    restarted.engine.on_timer_tick().await.unwrap();
    assert!(restarted.engine.pending_credits().is_empty());
    assert_eq!(h.balance("alice").await, 1_050);

    // The old engine retries the same tag: acknowledged, not paid twice
    assert_eq!(h.engine.retry_pending_credits().await.unwrap(), 1);
    assert_eq!(h.balance("alice").await, 1_050);
}

#[tokio::test]
async fn test_lost_wallet_replies_never_pay_twice() {
    let h = crash_harness(&[500]).await;
    assert!(h.place("alice", 100).await.is_success());

    // Stake applied but unanswered: the retry confirms the same bet
    h.wallet.set_replies_lost(true);
    assert_eq!(h.place("bob", 100).await.code, Some("WALLET_UNAVAILABLE"));
    assert_eq!(h.engine.pending_credits()[0].kind, TransitionKind::Stake);
    h.wallet.set_replies_lost(false);
    let retried = h.place("bob", 100).await;
    assert!(retried.is_success(), "{}", retried.message);
    assert_eq!(retried.new_balance, Some(900));
    assert!(h.engine.pending_credits().is_empty());

    // Both cash out at 1.50 and lose the reply
    h.run_to(CRASH_WAITING + flight_time(150)).await;
    h.wallet.set_replies_lost(true);
    for who in ["alice", "bob"] {
        assert_eq!(h.cashout(who).await.code, Some("WALLET_UNAVAILABLE"));
    }
    assert_eq!(h.balance("alice").await, 1_050);
    assert_eq!(h.engine.pending_credits().len(), 2);
    h.wallet.set_replies_lost(false);

    // alice retries at 4.00 and gets the 1.50 she was already credited
    h.clock.set(CRASH_WAITING + flight_time(400));
    let retried = h.cashout("alice").await;
    assert!(retried.is_success(), "{}", retried.message);
    assert_eq!(retried.new_balance, Some(1_050));
    assert_eq!(
        retried.bet.unwrap().cashout_multiplier,
        Some(Multiplier::from_hundredths(150))
    );

    // bob never retries: the outbox confirms his credit after the crash
    h.run_to(crash_cut(500) + Duration::from_secs(1)).await;
    let bob = h.engine.bet_for("bob").await.unwrap();
    assert_eq!((bob.state, bob.payout, bob.pending), (BetState::CashedOut, 150, false));
    assert_eq!(h.balance("bob").await, 1_050);
    assert!(h.engine.pending_credits().is_empty());

    let history = h.engine.history(1).unwrap();
    assert!(history[0].bets.iter().all(|b| !b.pending));
    assert_matches_wallet(&history[0], &h.wallet.inner);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reveal_credits_do_not_hold_the_round_lock() {
    let wallet = Arc::new(FlakyWallet::new(INITIAL_BALANCE));
    let h = color_harness_with(&[Color::Green], Arc::new(MemoryJournal::new()), wallet.clone()).await;
    let winners = ["w0", "w1", "w2", "w3", "w4"];
    for who in winners {
        assert!(h.place_color(who, 100, "green").await.is_success());
    }
    wallet.set_credit_delay(Duration::from_millis(200));

    h.clock.set(Duration::from_secs(31));
    let engine = h.engine.clone();
    let reveal = tokio::spawn(async move { engine.advance().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let snapshot = h.engine.snapshot().await;
    let waited = started.elapsed();
    assert_eq!(snapshot.phase, Phase::Resolved);
    assert!(!reveal.is_finished(), "credits were already done");
    assert!(waited < Duration::from_millis(400), "snapshot waited {:?}", waited);

    reveal.await.unwrap().unwrap();
    for who in winners {
        assert_eq!(h.balance(who).await, 1_100);
        assert!(!h.engine.bet_for(who).await.unwrap().pending);
    }
}

#[tokio::test]
async fn test_late_joiner_gets_a_snapshot_before_events() {
    let h = crash_harness(&[400]).await;
    let mut early = h.engine.subscribe().await;
    assert_eq!(early.snapshot.phase, Phase::Waiting);

    assert!(h.place("alice", 100).await.is_success());
    h.run_to(CRASH_WAITING + Duration::from_secs(2)).await;

    let mut late = h.engine.subscribe().await;
    assert_eq!(late.snapshot.phase, Phase::Active);
    assert!(late.snapshot.outcome.is_none());
    assert!(late.snapshot.multiplier.is_some());
    assert_eq!(late.snapshot.bets.len(), 1);
    assert_eq!(late.snapshot.bets[0].state, BetState::Placed);

    h.engine.on_multiplier_tick().await.unwrap();

    let seen_early = early.drain();
    let phases: Vec<Phase> = seen_early
        .iter()
        .filter_map(|m| match m.event {
            RoundEvent::PhaseChanged { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![Phase::Active]);

    let seen_late = late.drain();
    assert_eq!(seen_late.len(), 1);
    assert!(seen_late[0].seq > late.snapshot.seq);
    assert!(matches!(seen_late[0].event, RoundEvent::MultiplierTick { round_id: 1, .. }));
    assert!(matches!(late.try_next(), None | Some(Delivery::Event(_))));
}

#[tokio::test]
async fn test_scheduler_failure_forfeits_only_unresolved_rounds() {
    let h = crash_harness(&[400, 400]).await;
    assert!(h.place("alice", 100).await.is_success());
    h.run_to(CRASH_WAITING + Duration::from_secs(1)).await;

    let mut observer = h.engine.subscribe().await;
    let report = h.engine.forfeit_current(ForfeitCause::SchedulerFailure).await.unwrap();
    assert_eq!((report.round_id, report.bets_lost), (1, 1));
    assert_eq!(report.code(), "SCHEDULER_RESTART_FORFEIT");
    assert!(observer.drain().iter().any(|m| matches!(
        m.event,
        RoundEvent::RoundForfeited { round_id: 1, code: "SCHEDULER_RESTART_FORFEIT", .. }
    )));

    // A fresh round is already open and the stake stays with the house
    let snapshot = h.engine.snapshot().await;
    assert_eq!((snapshot.round_id, snapshot.phase), (2, Phase::Waiting));
    assert!(snapshot.recent[0].forfeited);
    assert_eq!(snapshot.recent[0].final_multiplier, None);
    assert_eq!(h.balance("alice").await, 900);

    // A failure during the cooldown interrupts nothing
    let opened = h.clock.now();
    h.run_to(opened + CRASH_WAITING + flight_time(400) + Duration::from_secs(1)).await;
    assert_eq!(h.engine.current_phase().await, Phase::Resolved);
    assert!(h.engine.forfeit_current(ForfeitCause::SchedulerFailure).await.is_none());

    let snapshot = h.engine.snapshot().await;
    assert_eq!((snapshot.round_id, snapshot.phase), (2, Phase::Resolved));
    assert!(!snapshot.recent[0].forfeited);
    assert_eq!(h.engine.history(5).unwrap().len(), 2);
}
