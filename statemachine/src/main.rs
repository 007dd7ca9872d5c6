use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fridgeos_common::client::HalClient;
use fridgeos_common::logger::FridgeLogger;
use fridgeos_statemachine::config::SmConfig;
use fridgeos_statemachine::engine::{HalClientAccess, StateMachine};
use fridgeos_statemachine::http::{router, AppState};

/// Serves the State Machine's HTTP control surface and runs its control loop
/// against a HAL reachable over HTTP.
#[derive(Parser, Debug)]
#[command(name = "statemachine-server", version)]
struct Args {
    /// Path to the state machine configuration TOML file.
    #[arg(long, default_value = "statemachine.toml")]
    config: PathBuf,

    /// Host the HAL server is reachable on.
    #[arg(long, default_value = "127.0.0.1")]
    hal_host: String,

    /// Port the HAL server is reachable on.
    #[arg(long, default_value_t = 8000)]
    hal_port: u16,

    /// Address to bind this server's HTTP API to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind this server's HTTP API to.
    #[arg(long, default_value_t = 8001)]
    port: u16,

    /// Fallback polling interval, overridden by the config's [settings] section.
    #[arg(long, default_value_t = 5.0)]
    polling_interval: f64,

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

    let _logger = FridgeLogger::init(&args.log_path, "StateMachine", args.debug)?;

    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    log::info!("initializing state machine with config: {}", args.config.display());

    let config = match SmConfig::load(&args.config, args.polling_interval) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load state machine config {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    let hal_client = HalClient::new(&args.hal_host, args.hal_port);
    let hal_access = HalClientAccess::new(hal_client);

    let machine = Arc::new(StateMachine::new(config, hal_access));
    machine.prime().await;

    log::info!(
        "state machine initialized. initial state: {}",
        machine.snapshot().await.current_state
    );

    let loop_handle = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move {
            machine.run_forever().await;
        })
    };

    let app = router(AppState { machine: Arc::clone(&machine) });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    log::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    loop_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutting down");
}
