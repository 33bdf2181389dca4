//! Engine metrics in Prometheus text format

use crate::errors::AscentResult;
use crate::games::types::{Amount, GameKind, Multiplier};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Counters shared by every game engine and the HTTP adapter.
///
/// Each instance owns its registry, so engines built in tests never collide.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    commands: IntCounterVec,
    rounds_resolved: IntCounterVec,
    rounds_forfeited: IntCounterVec,
    wagered: IntCounterVec,
    paid_out: IntCounterVec,
    crash_multiplier: Histogram,
    observers: IntGaugeVec,
}

impl EngineMetrics {
    pub fn new() -> AscentResult<Self> {
        let registry = Registry::new();

        let commands = IntCounterVec::new(
            Opts::new("ascent_commands_total", "Participant commands by result"),
            &["game", "command", "result"],
        )?;
        let rounds_resolved = IntCounterVec::new(
            Opts::new("ascent_rounds_resolved_total", "Rounds resolved normally"),
            &["game"],
        )?;
        let rounds_forfeited = IntCounterVec::new(
            Opts::new("ascent_rounds_forfeited_total", "Rounds forfeited after an interruption"),
            &["game"],
        )?;
        let wagered = IntCounterVec::new(
            Opts::new("ascent_wagered_total", "Stakes debited, minor units"),
            &["game"],
        )?;
        let paid_out = IntCounterVec::new(
            Opts::new("ascent_paid_out_total", "Refunds and winnings credited, minor units"),
            &["game"],
        )?;
        let crash_multiplier = Histogram::with_opts(
            HistogramOpts::new("ascent_crash_multiplier", "Crash points of resolved rounds")
                .buckets(vec![1.0, 1.01, 1.5, 2.0, 3.0, 5.0, 10.0, 50.0, 100.0, 1000.0]),
        )?;
        let observers = IntGaugeVec::new(
            Opts::new("ascent_observers", "Connected observers"),
            &["game"],
        )?;

        registry.register(Box::new(commands.clone()))?;
        registry.register(Box::new(rounds_resolved.clone()))?;
        registry.register(Box::new(rounds_forfeited.clone()))?;
        registry.register(Box::new(wagered.clone()))?;
        registry.register(Box::new(paid_out.clone()))?;
        registry.register(Box::new(crash_multiplier.clone()))?;
        registry.register(Box::new(observers.clone()))?;

        Ok(Self {
            registry,
            commands,
            rounds_resolved,
            rounds_forfeited,
            wagered,
            paid_out,
            crash_multiplier,
            observers,
        })
    }

    pub fn record_command(&self, game: GameKind, command: &str, result: &str) {
        self.commands
            .with_label_values(&[game.as_str(), command, result])
            .inc();
    }

    pub fn record_wager(&self, game: GameKind, amount: Amount) {
        self.wagered.with_label_values(&[game.as_str()]).inc_by(amount);
    }

    pub fn record_credit(&self, game: GameKind, amount: Amount) {
        self.paid_out.with_label_values(&[game.as_str()]).inc_by(amount);
    }

    pub fn record_resolved(&self, game: GameKind, crash_point: Option<Multiplier>) {
        self.rounds_resolved.with_label_values(&[game.as_str()]).inc();
        if let Some(point) = crash_point {
            self.crash_multiplier.observe(point.as_f64());
        }
    }

    pub fn record_forfeit(&self, game: GameKind) {
        self.rounds_forfeited.with_label_values(&[game.as_str()]).inc();
    }

    pub fn observer_joined(&self, game: GameKind) {
        self.observers.with_label_values(&[game.as_str()]).inc();
    }

    pub fn observer_left(&self, game: GameKind) {
        self.observers.with_label_values(&[game.as_str()]).dec();
    }

    pub fn command_count(&self, game: GameKind, command: &str, result: &str) -> u64 {
        self.commands
            .with_label_values(&[game.as_str(), command, result])
            .get()
    }

    /// Prometheus text exposition
    pub fn render(&self) -> AscentResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_command(GameKind::Crash, "place", "success");
        metrics.record_command(GameKind::Crash, "place", "success");
        metrics.record_wager(GameKind::Color, 150);
        metrics.record_resolved(GameKind::Crash, Some(Multiplier::from_hundredths(180)));

        assert_eq!(metrics.command_count(GameKind::Crash, "place", "success"), 2);
        let text = metrics.render().unwrap();
        assert!(text.contains("ascent_wagered_total{game=\"color\"} 150"));
        assert!(text.contains("ascent_crash_multiplier_count 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.record_forfeit(GameKind::Crash);
        assert!(!b.render().unwrap().contains("ascent_rounds_forfeited_total{game=\"crash\"} 1"));
    }
}
