//! # tether - command line entry point
//!
//! 1. **Configuration** - defaults, then the TOML file, then `TETHER_*`
//! 2. **Tracing** - `RUST_LOG` if set, else the configured filter
//! 3. **Manifest** - every document is created in the in-memory store
//! 4. **Loops** - the gate loop starts binding loops as their kinds are served

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tether::cli::{Cli, Commands};
use tether::{assemble, manifest, System};
use tether_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = tether_core::load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Converge {
            manifest,
            max_rounds,
        } => converge(config, &manifest, max_rounds).await,
        Commands::Run { manifest } => run(&config, &manifest).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so that printed objects can be piped.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn load(config: &Config, path: &Path) -> Result<System> {
    let system = assemble(config).context("Failed to assemble control loops")?;
    let objects = manifest::read_manifest(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let count = manifest::apply(system.store.as_ref(), objects).await?;
    info!(objects = count, manifest = %path.display(), "Manifest loaded");
    Ok(system)
}

async fn converge(mut config: Config, path: &Path, max_rounds: Option<u32>) -> Result<()> {
    if let Some(rounds) = max_rounds {
        config.runtime.max_rounds = rounds;
        config.validate()?;
    }
    let mut system = load(&config, path).await?;

    let convergence = system.driver.converge().await;
    let kinds = system.kinds();
    print!("{}", manifest::render(system.store.as_ref(), &kinds).await?);

    if !convergence.converged {
        bail!("did not converge within {} rounds", convergence.rounds);
    }
    Ok(())
}

async fn run(config: &Config, path: &Path) -> Result<()> {
    let mut system = load(config, path).await?;
    let stopper = system.driver.stopper();

    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });

    info!("tether is running. Press Ctrl+C to stop.");
    system.driver.run().await;
    info!("tether stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
