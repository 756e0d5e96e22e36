//! Fluxmesh entry point: load one or more YAML config files and run the
//! connector until a shutdown signal arrives.

// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

// Layer 3: Internal module imports
use fluxmesh_rt::config::load_config_files;
use fluxmesh_rt::connector::Connector;

#[derive(Parser, Debug)]
#[command(
    name = "fluxmesh",
    about = "Declarative streaming integration runtime",
    version
)]
struct Cli {
    /// Configuration files, merged in order (later files win).
    #[arg(required = true, value_name = "CONFIG")]
    configs: Vec<PathBuf>,
}

fn init_logging(config: &serde_json::Value) {
    let default_level = config
        .get("log")
        .and_then(|log| log.get("stdout_log_level"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("info")
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config_files(&cli.configs).context("loading configuration")?;
    init_logging(&config);

    let mut connector = Connector::new(config).context("constructing connector")?;
    connector.run().await.context("starting connector")?;

    let shutdown = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = sigterm.recv() => {}
            }
            Ok::<_, std::io::Error>(())
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    };

    tokio::select! {
        result = shutdown => {
            result.context("waiting for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
        _ = connector.wait() => {}
    }

    connector.cleanup().await;
    Ok(())
}
