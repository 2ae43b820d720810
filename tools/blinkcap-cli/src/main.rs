//! Blinkcap CLI — run pattern captures and reconstruct the results.
//!
//! Usage:
//!   blinkcap run [OPTIONS]     Capture a signaling session and write stills
//!   blinkcap pattern           Print the tick schedule
//!   blinkcap check             Check backend availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "blinkcap",
    about = "Pattern-synchronized camera capture and reconstruction",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a signaling session, then decode the units into PNGs
    Run {
        /// Signaling pattern (`0`/`1` string); default from config
        #[arg(long)]
        pattern: Option<String>,

        /// Total session duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Per-tick settle delay in milliseconds
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Directory for reconstructed stills
        #[arg(short, long, default_value = "blinkcap-out")]
        output: PathBuf,

        /// Use the synthetic source and passthrough codec instead of
        /// the live camera backends
        #[arg(long)]
        synthetic: bool,

        /// Explicit camera device node (e.g. /dev/video2)
        #[arg(long)]
        device: Option<String>,
    },

    /// Print the tick schedule for a pattern
    Pattern {
        /// Signaling pattern (`0`/`1` string); default from config
        #[arg(long)]
        pattern: Option<String>,

        /// Total session duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Check backend availability
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    blinkcap_common::logging::init_logging(&blinkcap_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Run {
            pattern,
            duration_ms,
            settle_ms,
            output,
            synthetic,
            device,
        } => commands::run::run(pattern, duration_ms, settle_ms, output, synthetic, device).await,
        Commands::Pattern {
            pattern,
            duration_ms,
        } => commands::pattern::run(pattern, duration_ms),
        Commands::Check => commands::check::run(),
    }
}
