use anyhow::{Context, Result};
use helios::config::Config;
use helios::controller::{ChargeController, ControllerExit};
use helios::inverter::{AlphaEssClient, Inverter};
use helios::logging::init_logging;
use helios::vehicle::{ChargeTarget, TeslaVehicleClient};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    info!("Helios {} starting up", env!("APP_VERSION"));

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Power source: authenticates and reads the rated output
    let alphaess = AlphaEssClient::new(&config.inverter)?;
    let inverter = Inverter::connect(alphaess, &config.controls)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to inverter: {}", e))?;

    let tesla = TeslaVehicleClient::connect(&config.vehicle)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to vehicle: {}", e))?;
    let target = ChargeTarget::new(Box::new(tesla), &config.controls, &config.vehicle);

    let mut controller = ChargeController::new(Box::new(inverter), target, &config.controls);
    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.send(()).ok();
    });

    match controller.run().await {
        Ok(ControllerExit::Shutdown) => {
            info!("Helios shutdown complete");
            Ok(())
        }
        Ok(exit) => {
            error!("Charge loop ended: {}", exit);
            Err(anyhow::anyhow!("Charge loop ended: {}", exit))
        }
        Err(e) => {
            error!("Controller failed with error: {}", e);
            Err(anyhow::anyhow!("Controller error: {}", e))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => info!("received ctrl_c; shutting down"),
            _ = terminate() => info!("received SIGTERM; shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
