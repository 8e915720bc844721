// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outpost - durable outbound WhatsApp message queue.
//!
//! This is the binary entry point: the long-running `serve` command plus
//! operator commands that work directly against the job database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod ops;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::ops::QueueCommand;

/// Outpost - durable outbound WhatsApp message queue.
#[derive(Parser, Debug)]
#[command(name = "outpost", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file (plus environment) only.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delivery service until SIGINT or SIGTERM.
    Serve,
    /// Validate the configuration and exit.
    CheckConfig,
    #[command(flatten)]
    Queue(QueueCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => outpost_config::load_and_validate_path(path),
        None => outpost_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            outpost_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => {
            init_tracing(&config.service.log_level);
            serve::run_serve(config).await
        }
        Commands::CheckConfig => {
            println!(
                "outpost: configuration OK (service.name={}, database={})",
                config.service.name, config.storage.database_path
            );
            Ok(())
        }
        Commands::Queue(command) => {
            init_tracing("warn");
            ops::run(command, &config, &mut std::io::stdout()).await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("outpost={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
