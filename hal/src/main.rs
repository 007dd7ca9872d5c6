use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fridgeos_common::logger::FridgeLogger;
use fridgeos_hal::calibration::CalibrationCache;
use fridgeos_hal::config::HardwareConfig;
use fridgeos_hal::core::Hal;
use fridgeos_hal::drivers::registry::DriverRegistry;
use fridgeos_hal::http::{router, AppState};

/// Serves the HAL's HTTP API over the hardware described by a TOML config file.
#[derive(Parser, Debug)]
#[command(name = "hal-server", version)]
struct Args {
    /// Path to the hardware configuration TOML file.
    #[arg(long, default_value = "hardware.toml")]
    config: PathBuf,

    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Directory to write rotating log files to.
    #[arg(long, default_value = "logs")]
    log_path: PathBuf,

    /// Capture every log record (not just INFO and above) to a debug file.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _logger = FridgeLogger::init(&args.log_path, "HAL", args.debug)?;

    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let config = match HardwareConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load hardware config {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    let registry = DriverRegistry::with_demo_drivers();
    let calibration_cache = CalibrationCache::new();

    let hal = match Hal::build(&config, &registry, &calibration_cache) {
        Ok(hal) => hal,
        Err(e) => {
            log::error!("failed to initialize hardware: {e}");
            std::process::exit(1);
        }
    };

    log::info!(
        "HAL ready with {} thermometers, {} heaters",
        hal.thermometer_names().len(),
        hal.heater_names().len()
    );

    let state = AppState { hal: Arc::new(hal) };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    log::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutting down");
}
