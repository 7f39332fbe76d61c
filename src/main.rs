mod artifacts;
mod config;
mod coordinator;
mod discover;
mod enrich;
mod error;
mod fetch;
mod firmware;
mod model;
mod persistence;
mod poller;
mod sysinfo;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use coordinator::Coordinator;
use error::PollerError;
use persistence::Persistence;

const CYCLE_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "aredn-meshpoll", about = "AREDN mesh network poller and map data generator")]
struct Cli {
    /// Path to the INI settings file.
    #[arg(long, default_value = "../settings.ini")]
    config: PathBuf,

    /// Run a single poll cycle and exit instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Drop and recreate the node table, then exit.
    #[arg(long)]
    flush: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aredn_meshpoll=info".into()),
        )
        .init();
}

async fn install_signal_handlers(shutdown: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, finishing current cycle then exiting"),
                _ = sigterm.recv() => info!("received SIGTERM, finishing current cycle then exiting"),
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, finishing current cycle then exiting");
            shutdown.store(true, Ordering::SeqCst);
        });
    }
}

async fn run() -> Result<(), PollerError> {
    let cli = Cli::parse();

    let settings = config::load(&cli.config)?;
    info!("loaded configuration from {}", cli.config.display());

    let client = fetch::build_client(10)
        .map_err(|e| PollerError::Config(format!("failed to build http client: {e}")))?;
    let persistence = Persistence::connect(&settings.database).await?;
    persistence.ensure_schema().await?;

    if cli.flush {
        info!("--flush: dropping and recreating node table");
        persistence.flush().await?;
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown.clone()).await;

    let coordinator = Coordinator::new(client, Arc::new(persistence), settings, shutdown.clone());

    if cli.once {
        coordinator.run_cycle().await?;
        return Ok(());
    }

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = coordinator.run_cycle().await {
            warn!("cycle failed, retrying in {}s: {e}", CYCLE_RETRY_DELAY.as_secs());
            tokio::time::sleep(CYCLE_RETRY_DELAY).await;
        }
    }

    info!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
