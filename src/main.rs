//! Ascent server
//!
//! Runs the crash and color round engines behind the HTTP/WebSocket adapter.

use ascent::{
    api::{ApiServer, AppState},
    config::{generate_sample_config, validate, AscentConfig, ConfigLoader},
    errors::{AscentResult, EngineError},
    games::{spawn_supervised, ActionGateway, EngineDeps, EngineSettings, ForfeitReport, GameEngine, InMemoryWallet, OutcomeGenerator},
    storage::{MemoryJournal, RocksJournal, RoundJournal},
    EngineMetrics, MonotonicClock,
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

/// Ascent round engine server
#[derive(Parser, Debug)]
#[command(name = "ascent-server")]
#[command(about = "Crash and color round engine with bet settlement", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Round journal directory
    #[arg(long)]
    db_path: Option<String>,

    /// Keep the round journal in memory
    #[arg(long)]
    in_memory: bool,

    /// Write the default configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<String>,
}

#[tokio::main]
async fn main() -> AscentResult<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.write_default_config {
        generate_sample_config(&path)?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();

    info!("Starting Ascent round engine v{}", env!("CARGO_PKG_VERSION"));

    let journal: Arc<dyn RoundJournal> = if config.storage.in_memory {
        warn!("Round journal is in memory: interrupted rounds cannot be recovered after a restart");
        Arc::new(MemoryJournal::new())
    } else {
        info!("Round journal: {}", config.storage.data_directory);
        Arc::new(RocksJournal::open(&config.storage.data_directory)?)
    };

    let metrics = Arc::new(EngineMetrics::new()?);
    let deps = EngineDeps {
        clock: Arc::new(MonotonicClock::new()),
        wallet: Arc::new(InMemoryWallet::new(config.wallet.initial_balance)),
        journal,
        metrics: metrics.clone(),
    };

    let (crash, crash_forfeit) = GameEngine::start(
        EngineSettings::crash(&config.crash),
        OutcomeGenerator::crash(&config.crash),
        deps.clone(),
    )
    .await?;
    let (color, color_forfeit) = GameEngine::start(
        EngineSettings::color(&config.color),
        OutcomeGenerator::color(&config.color)?,
        deps,
    )
    .await?;

    for report in [crash_forfeit, color_forfeit].iter().flatten() {
        log_forfeit(report);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let schedulers = vec![
        spawn_supervised(crash.clone(), shutdown_rx.clone()),
        spawn_supervised(color.clone(), shutdown_rx),
    ];

    let state = Arc::new(AppState {
        crash: Arc::new(ActionGateway::new(crash)),
        color: Arc::new(ActionGateway::new(color)),
        metrics,
        history_limit: config.storage.history_limit,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let served = ApiServer::new(config.server.clone(), state)
        .run(shutdown_signal())
        .await;

    // Round timers stop only here
    let _ = shutdown_tx.send(true);
    for handle in schedulers {
        if let Err(e) = handle.await {
            error!("Scheduler did not stop cleanly: {}", e);
            return Err(EngineError::SchedulerFailed(e.to_string()).into());
        }
    }

    info!("Ascent stopped");
    served
}

fn load_config(cli: &Cli) -> AscentResult<AscentConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(db_path) = &cli.db_path {
        config.storage.data_directory = db_path.clone();
    }
    if cli.in_memory {
        config.storage.in_memory = true;
    }

    validate(&config)?;
    Ok(config)
}

fn log_forfeit(report: &ForfeitReport) {
    warn!(
        game = %report.game,
        round_id = report.round_id,
        code = report.code(),
        bets_lost = report.bets_lost,
        calls_queued = report.calls_queued,
        "Unfinished round from the previous run was forfeited"
    );
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
