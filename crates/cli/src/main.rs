use clap::Parser;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "hostrelay")]
#[command(about = "Run a fixed set of host commands from a Telegram chat", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path (default: HOSTRELAY_CONFIG_PATH or ~/.hostrelay/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// HTTP port for the health probe and webhook (default from config or 15152)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let (mut config, path) = match hostrelay::config::load_config(cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            log::error!("config: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Some(p) = cli.port {
        config.gateway.port = p;
    }
    let settings = match hostrelay::config::RelaySettings::from_env(&config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("config: {}", e);
            std::process::exit(1);
        }
    };

    log::info!(
        "hostrelay {} starting on {}:{} (config {})",
        env!("CARGO_PKG_VERSION"),
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    if let Err(e) = hostrelay::gateway::run_relay(config, settings, shutdown).await {
        log::error!("relay failed: {:#}", e);
        std::process::exit(2);
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
    shutdown.cancel();
}
