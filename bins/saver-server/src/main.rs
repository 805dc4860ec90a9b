use clap::Parser;

#[derive(Parser)]
#[command(name = "saver-server", about = "Persists a payload stream to disk under a size quota")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "saver.toml", env = "SAVER_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let config = match saver_engine::SaverConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    tracing::info!(
        disk_path = %config.disk_path.display(),
        mode = ?config.mode,
        "bootstrapping saver"
    );
    let saver = match saver_engine::Saver::bootstrap(config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap saver");
            std::process::exit(1);
        }
    };

    if let Some(addr) = saver.source_addr() {
        tracing::info!(address = %addr, "accepting newline-delimited payloads");
    }
    tracing::info!("saver-server started, press Ctrl+C to stop");

    wait_for_signal().await;
    tracing::info!("shutting down...");

    let report = saver.shutdown().await;
    if !report.failed.is_empty() {
        tracing::error!(failed = ?report.failed, "some components failed to stop cleanly");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::process::exit(1);
        }
    };
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
