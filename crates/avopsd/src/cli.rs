//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap.
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AVOps diagnostic copilot daemon
#[derive(Parser)]
#[command(name = "avopsd")]
#[command(about = "AVOps Copilot - diagnostic assistant for AV operations", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides /etc/avops/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Run one diagnosis and print the stored run
    Run {
        /// Free-text task, e.g. "diagnose device-001"
        #[arg(long)]
        task: String,

        /// Owner of the run (defaults to server.default_user_id)
        #[arg(long)]
        user: Option<i64>,
    },

    /// List stored runs, newest first
    Runs {
        #[arg(long)]
        user: Option<i64>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Knowledge base maintenance
    Kb {
        #[command(subcommand)]
        action: KbCommands,
    },

    /// Telemetry ingestion
    Telemetry {
        #[command(subcommand)]
        action: TelemetryCommands,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum KbCommands {
    /// Insert the built-in AV operations articles
    Seed,

    /// Index a text file as an article
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        source: Option<String>,

        /// File holding the article body
        #[arg(long)]
        file: PathBuf,
    },

    /// Print one stored article
    Show { id: i64 },

    /// Search the knowledge base like the copilot does
    Search {
        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum TelemetryCommands {
    /// Store one telemetry sample
    Record {
        #[arg(long)]
        device: String,

        #[arg(long)]
        temperature: i64,

        #[arg(long)]
        packet_loss: i64,

        #[arg(long)]
        audio_dropouts: i64,

        #[arg(long)]
        error_code: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        #[arg(long, default_value = "/etc/avops/config.toml")]
        path: PathBuf,
    },

    /// Print the effective config
    Show,
}
