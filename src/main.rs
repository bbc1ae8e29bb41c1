//! Signal Engine - automated entry/exit loops against a broker gateway
//!
//! 1. Loads configuration from `signal-engine.toml` and `SIGNAL_ENGINE_*` variables
//! 2. Starts the paper gateway
//! 3. Runs the entry and exit loops until Ctrl-C or a fatal entry error

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use signal_engine::{BrokerGateway, EngineConfig, EntryLoop, ExitLoop, LoggingConfig, PaperGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load()?;
    init_logging(&config.logging)?;

    info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe,
        "Starting Signal Engine..."
    );
    warn!("Running against the PAPER gateway - no live orders are sent");

    let gateway: Arc<dyn BrokerGateway> = Arc::new(PaperGateway::new(
        &config.symbol,
        config.timeframe,
        config.paper.clone(),
    ));

    let mut entry = EntryLoop::new(gateway.clone(), config.clone());
    let mut exit = ExitLoop::new(gateway, config);

    let entry_handle = tokio::spawn(async move { entry.run().await });
    let exit_handle = tokio::spawn(async move { exit.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        result = entry_handle => {
            match result {
                Ok(Ok(())) => info!("Entry loop finished"),
                Ok(Err(e)) => {
                    error!("Entry loop terminated: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(anyhow::anyhow!("Entry loop panicked: {}", e)),
            }
        }
        result = exit_handle => {
            if let Err(e) = result {
                return Err(anyhow::anyhow!("Exit loop panicked: {}", e));
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_max_level(logging.tracing_level());

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }

    Ok(())
}
