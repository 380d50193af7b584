//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tether - claim, class and managed resource reconciliation
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Binds resource claims to classes and managed resources")]
#[command(
    long_about = "tether loads a YAML manifest into an in-memory store and runs the claim binding, class defaulting, secret propagation and readiness gate loops over it."
)]
pub struct Cli {
    /// Config file (defaults to ./tether.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the loops until nothing changes, then print every object
    Converge {
        /// Multi-document YAML manifest
        #[arg(short, long)]
        manifest: PathBuf,

        /// Override the configured maximum number of rounds
        #[arg(long)]
        max_rounds: Option<u32>,
    },

    /// Run the loops continuously until Ctrl+C
    Run {
        /// Multi-document YAML manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}
