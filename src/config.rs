//! Configuration management with validation and defaults
//!
//! Layered the usual way: built-in defaults, then an optional TOML file, then
//! `ASCENT_*` environment overrides, then validation.

use crate::errors::{AscentResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Complete server configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AscentConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub wallet: WalletConfig,
    pub crash: CrashConfig,
    pub color: ColorConfig,
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket adapter settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Round journal settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep the journal in memory only (restart forfeits cannot be detected)
    pub in_memory: bool,
    /// Upper bound for history queries
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/rounds".to_string(),
            in_memory: false,
            history_limit: 50,
        }
    }
}

/// In-memory wallet settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Opening balance for participants the wallet has never seen
    pub initial_balance: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1_000,
        }
    }
}

/// Multiplier ("flight") game settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    pub waiting_secs: u64,
    pub cooldown_ms: u64,
    /// Exponent of the curve `m(t) = exp(growth_rate * t)`, per second
    pub growth_rate: f64,
    pub house_edge: f64,
    pub max_multiplier: f64,
    pub timer_tick_ms: u64,
    pub multiplier_tick_ms: u64,
    pub min_bet: u64,
    pub max_bet: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            waiting_secs: 20,
            cooldown_ms: 3_000,
            growth_rate: 0.06,
            house_edge: 0.03,
            max_multiplier: 1_000.0,
            timer_tick_ms: 1_000,
            multiplier_tick_ms: 100,
            min_bet: 1,
            max_bet: 100_000,
        }
    }
}

impl CrashConfig {
    pub fn waiting(&self) -> Duration {
        Duration::from_secs(self.waiting_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Per-color numbers (weights or payouts)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColorTable<T> {
    pub red: T,
    pub green: T,
    pub violet: T,
}

/// Fixed-interval color game settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub waiting_secs: u64,
    pub reveal_secs: u64,
    pub cooldown_secs: u64,
    pub timer_tick_ms: u64,
    pub weights: ColorTable<u32>,
    pub payouts: ColorTable<f64>,
    pub min_bet: u64,
    pub max_bet: u64,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            waiting_secs: 25,
            reveal_secs: 5,
            cooldown_secs: 5,
            timer_tick_ms: 1_000,
            weights: ColorTable { red: 45, green: 45, violet: 10 },
            payouts: ColorTable { red: 2.0, green: 2.0, violet: 1.5 },
            min_bet: 1,
            max_bet: 100_000,
        }
    }
}

impl ColorConfig {
    pub fn waiting(&self) -> Duration {
        Duration::from_secs(self.waiting_secs)
    }

    pub fn reveal(&self) -> Duration {
        Duration::from_secs(self.reveal_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ascent=info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> AscentResult<AscentConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            AscentConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> AscentResult<AscentConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut AscentConfig) -> AscentResult<()> {
        if let Ok(host) = env::var("ASCENT_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("ASCENT_PORT") {
            config.server.port = parse_env("ASCENT_PORT", port, "Invalid port number")?;
        }
        if let Ok(dir) = env::var("ASCENT_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Ok(edge) = env::var("ASCENT_HOUSE_EDGE") {
            config.crash.house_edge = parse_env("ASCENT_HOUSE_EDGE", edge, "Invalid decimal value")?;
        }
        if let Ok(balance) = env::var("ASCENT_INITIAL_BALANCE") {
            config.wallet.initial_balance =
                parse_env("ASCENT_INITIAL_BALANCE", balance, "Invalid amount")?;
        }
        if let Ok(filter) = env::var("ASCENT_LOG") {
            config.logging.filter = filter;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &AscentConfig, path: &str) -> AscentResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String, reason: &str) -> AscentResult<T> {
    value.parse().map_err(|_| {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value,
            reason: reason.to_string(),
        }
        .into()
    })
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> AscentResult<()> {
    Err(ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into())
}

/// Validate configuration values
pub fn validate(config: &AscentConfig) -> AscentResult<()> {
    if config.server.port == 0 {
        return invalid("server.port", 0, "Port cannot be zero");
    }
    if !config.storage.in_memory && config.storage.data_directory.is_empty() {
        return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()).into());
    }

    let crash = &config.crash;
    if !(0.0..1.0).contains(&crash.house_edge) {
        return invalid("crash.house_edge", crash.house_edge, "House edge must be in [0, 1)");
    }
    if !(crash.max_multiplier > 1.0) {
        return invalid("crash.max_multiplier", crash.max_multiplier, "Must be greater than 1.0");
    }
    if !(crash.growth_rate > 0.0) || !crash.growth_rate.is_finite() {
        return invalid("crash.growth_rate", crash.growth_rate, "Must be a positive number");
    }
    if crash.waiting_secs == 0 {
        return invalid("crash.waiting_secs", 0, "Betting window cannot be zero");
    }
    if crash.timer_tick_ms == 0 || crash.multiplier_tick_ms == 0 {
        return invalid("crash.timer_tick_ms", 0, "Tick cadence cannot be zero");
    }
    if crash.min_bet == 0 || crash.min_bet > crash.max_bet {
        return invalid("crash.min_bet", crash.min_bet, "Must be positive and not above max_bet");
    }

    let color = &config.color;
    if color.waiting_secs == 0 {
        return invalid("color.waiting_secs", 0, "Betting window cannot be zero");
    }
    if color.timer_tick_ms == 0 {
        return invalid("color.timer_tick_ms", 0, "Tick cadence cannot be zero");
    }
    let weights = &color.weights;
    if weights.red as u64 + weights.green as u64 + weights.violet as u64 == 0 {
        return invalid("color.weights", 0, "At least one color needs a weight");
    }
    for (field, payout) in [
        ("color.payouts.red", color.payouts.red),
        ("color.payouts.green", color.payouts.green),
        ("color.payouts.violet", color.payouts.violet),
    ] {
        if !(payout >= 1.0) || !payout.is_finite() {
            return invalid(field, payout, "Payout multiplier must be at least 1.0");
        }
    }
    if color.min_bet == 0 || color.min_bet > color.max_bet {
        return invalid("color.min_bet", color.min_bet, "Must be positive and not above max_bet");
    }

    Ok(())
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> AscentResult<()> {
    ConfigLoader::new().save(&AscentConfig::default(), path)
}
