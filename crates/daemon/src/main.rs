use std::path::PathBuf;
use std::sync::Arc;

use bioamp_board::spi_board::DEFAULT_DRDY_PIN;
use bioamp_board::{BoardDriver, BusGuard, MockBoard, SpiBoard, SpiGpioGuard};
use bioamp_daemon::acquisition::AcquisitionService;
use bioamp_daemon::api::AppState;
use bioamp_daemon::state::{Settings, SharedState};
use bioamp_daemon::{config, server};
use clap::{Arg, Command};
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bioamp_daemon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("bioamp_daemon")
        .about("Biosignal acquisition daemon")
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(clap::ArgAction::SetTrue)
                .help("Use synthetic board data instead of real hardware"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("bioamp.json")
                .help("Path to the daemon configuration file"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("bioamp.json"));
    let config = Arc::new(config::load_config(&config_path));

    let driver: Box<dyn BoardDriver> = if matches.get_flag("mock") {
        tracing::info!("using mock sensing board");
        Box::new(MockBoard::new())
    } else {
        tracing::info!("using direct SPI sensing board (DRDY on GPIO {DEFAULT_DRDY_PIN})");
        Box::new(SpiBoard::new(DEFAULT_DRDY_PIN))
    };
    let guard: Box<dyn BusGuard> = Box::new(SpiGpioGuard::new(DEFAULT_DRDY_PIN));

    let shared = Arc::new(SharedState::new(Settings::default()));
    let service = Arc::new(AcquisitionService::new(shared.clone(), driver, guard, config.clone()));
    let app_state = AppState {
        service: service.clone(),
        shared,
        config: config.clone(),
        experiment_ready: Arc::new(Notify::new()),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server_handle = tokio::spawn(server::run(app_state, config.port, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping acquisition");
    service.stop().await;
    let _ = shutdown_tx.send(());
    server_handle.await??;
    tracing::info!("daemon stopped");
    Ok(())
}
