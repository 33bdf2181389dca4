//! Hidden outcome generation and the public multiplier curve.
//!
//! The generator draws once per round, at creation, from an OS-seeded RNG. It
//! never sees the bets of the round it draws for.

use crate::config::{ColorConfig, ColorTable, CrashConfig};
use crate::errors::{AscentResult, ConfigurationError};
use crate::games::types::{Color, Multiplier, RoundOutcome};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Deterministic `m(t) = exp(r·t)` flight curve.
///
/// Observers rebuild the same values from elapsed time alone; only the crash
/// target is secret.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierCurve {
    growth_rate: f64,
}

impl MultiplierCurve {
    pub fn new(growth_rate: f64) -> Self {
        Self { growth_rate }
    }

    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    /// Multiplier after `elapsed` flight time
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        (self.growth_rate * elapsed.as_secs_f64()).exp()
    }

    /// Flight time at which the curve reaches `target`
    pub fn time_to_reach(&self, target: Multiplier) -> Duration {
        let seconds = target.as_f64().max(1.0).ln() / self.growth_rate;
        Duration::from_secs_f64(seconds)
    }
}

/// Crash point for a uniform draw `u` in `[0, 1)`.
///
/// `floor(100·(1−edge)/(1−u))/100`, clamped to `[1.00, max]`, so that
/// `P(crash ≥ x) = (1−edge)/x` and the round busts instantly at 1.00 with
/// probability `edge`.
pub fn crash_point_for(u: f64, house_edge: f64, max: Multiplier) -> Multiplier {
    let u = u.clamp(0.0, 1.0 - f64::EPSILON);
    let raw = 100.0 * (1.0 - house_edge) / (1.0 - u);
    let hundredths = if raw.is_finite() { (raw + 1e-9).floor() as u64 } else { max.hundredths() };
    Multiplier::from_hundredths(hundredths.clamp(Multiplier::ONE.hundredths(), max.hundredths()))
}

/// Payout multiplier per winning color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorPayouts {
    pub red: Multiplier,
    pub green: Multiplier,
    pub violet: Multiplier,
}

impl ColorPayouts {
    pub fn from_table(table: &ColorTable<f64>) -> Self {
        Self {
            red: Multiplier::round_from(table.red),
            green: Multiplier::round_from(table.green),
            violet: Multiplier::round_from(table.violet),
        }
    }

    pub fn for_color(&self, color: Color) -> Multiplier {
        match color {
            Color::Red => self.red,
            Color::Green => self.green,
            Color::Violet => self.violet,
        }
    }
}

enum DrawRules {
    Crash {
        house_edge: f64,
        max_multiplier: Multiplier,
    },
    Color {
        index: WeightedIndex<u32>,
    },
    Scripted {
        outcomes: Vec<RoundOutcome>,
        next: usize,
    },
}

const COLORS: [Color; 3] = [Color::Red, Color::Green, Color::Violet];

/// Per-game outcome generator
pub struct OutcomeGenerator {
    rng: StdRng,
    rules: DrawRules,
}

impl OutcomeGenerator {
    /// Crash-point generator seeded from the OS
    pub fn crash(config: &CrashConfig) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            rules: DrawRules::Crash {
                house_edge: config.house_edge,
                max_multiplier: Multiplier::floor_from(config.max_multiplier),
            },
        }
    }

    /// Weighted color generator seeded from the OS
    pub fn color(config: &ColorConfig) -> AscentResult<Self> {
        let weights = [config.weights.red, config.weights.green, config.weights.violet];
        let index = WeightedIndex::new(weights).map_err(|e| ConfigurationError::InvalidValue {
            field: "color.weights".to_string(),
            value: format!("{:?}", weights),
            reason: e.to_string(),
        })?;

        Ok(Self {
            rng: StdRng::from_entropy(),
            rules: DrawRules::Color { index },
        })
    }

    /// Replay `outcomes` in order, cycling (simulations and tests).
    /// An empty script busts every round at 1.00x.
    pub fn scripted(outcomes: Vec<RoundOutcome>) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            rules: DrawRules::Scripted { outcomes, next: 0 },
        }
    }

    /// Replace the RNG with a seeded one (reproducible simulations)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Draw the hidden outcome for a new round
    pub fn draw(&mut self) -> RoundOutcome {
        match &mut self.rules {
            DrawRules::Crash {
                house_edge,
                max_multiplier,
            } => {
                let u: f64 = self.rng.gen();
                RoundOutcome::Crash {
                    multiplier: crash_point_for(u, *house_edge, *max_multiplier),
                }
            }
            DrawRules::Color { index } => RoundOutcome::Color {
                color: COLORS[index.sample(&mut self.rng)],
            },
            DrawRules::Scripted { outcomes, next } => {
                let outcome = match outcomes.get(*next % outcomes.len().max(1)) {
                    Some(outcome) => *outcome,
                    None => RoundOutcome::Crash {
                        multiplier: Multiplier::ONE,
                    },
                };
                *next += 1;
                outcome
            }
        }
    }
}
