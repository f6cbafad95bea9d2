use agbot::adapters::{
    MemoryAgreementStore, MemoryProtocolRecorder, RecordingMessenger, StaticEndpointResolver,
};
use agbot::cli::{self, Cli, Commands};
use agbot::config::{AppConfig, LoggingConfig};
use agbot::coordinator::{Collaborators, PolicyManager};
use agbot::error::{AgbotError, Result};
use agbot::protocol::{BasicProtocolHandler, ConsumerProtocolHandler};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Reasons { json }) => {
            let cfg = AppConfig::default_config(1);
            let handler = build_handler(&cfg)?;
            cli::print_reasons(&handler, *json)?;
        }
        Some(Commands::Check) => {
            let cfg = load_config(&cli)?;
            println!(
                "Configuration OK: {} protocol, {} workers",
                cfg.agreement_bot.protocol, cfg.agreement_bot.agreement_workers
            );
        }
        Some(Commands::Run) | None => {
            let cfg = load_config(&cli)?;
            init_logging(&cfg.logging);
            run(cfg).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut cfg = AppConfig::load_from(&cli.config_dir)?;
    if let Some(workers) = cli.workers {
        cfg.agreement_bot.agreement_workers = workers;
    }
    cfg.validate()
        .map_err(|errors| AgbotError::Validation(errors.join("; ")))?;
    Ok(cfg)
}

fn build_handler(cfg: &AppConfig) -> Result<BasicProtocolHandler> {
    let collaborators = Collaborators {
        store: Arc::new(MemoryAgreementStore::new()),
        policies: Arc::new(PolicyManager::new()),
        resolver: Arc::new(StaticEndpointResolver::new()),
        messenger: Arc::new(RecordingMessenger::new()),
        recorder: Arc::new(MemoryProtocolRecorder::new()),
    };
    BasicProtocolHandler::new(&cfg.agreement_bot.protocol, &cfg.agreement_bot, collaborators)
}

async fn run(cfg: AppConfig) -> Result<()> {
    let handler = Arc::new(build_handler(&cfg)?);
    handler.initialize().await?;
    info!(handler = %handler, "Agreement bot running. Press Ctrl+C to stop.");

    let mut deferred = interval(Duration::from_secs(
        cfg.agreement_bot.deferred_command_interval_secs,
    ));
    deferred.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = deferred.tick() => {
                handler.handle_deferred_commands().await;
                if let Err(e) = handler.expire_unanswered_proposals().await {
                    warn!(error = %e, "Unable to time out unanswered proposals");
                }
            }
        }
    }

    info!("Shutting down agreement workers");
    handler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},agbot={}", cfg.level, cfg.level)));

    if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
