//! Entry point of the transmitter station server

use clap::Parser;
use cvqkd_alice::server::AliceServer;
use cvqkd_alice::{admin, hardware};
use cvqkd_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// CV-QKD transmitter station server
#[derive(Parser)]
#[command(name = "cvqkd-alice", version, about)]
struct Cli {
    /// Path of the configuration file
    #[arg(short = 'f', long = "file", default_value = "config.toml")]
    file: PathBuf,

    /// Console verbosity: -v errors, -vv +warnings, -vvv everything
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        // Four or more v's behave like three.
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let config = match Config::load(&cli.file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    if let Err(e) = admin::install() {
        eprintln!("failed to install the interrupt handler: {e}");
        return 1;
    }

    let mut bench = match hardware::build_bench(&config) {
        Ok(bench) => bench,
        Err(e) => {
            eprintln!("hardware initialisation failed: {e}");
            return 1;
        }
    };
    if let Err(e) = hardware::startup(&mut bench, &config) {
        eprintln!("hardware startup failed: {e}");
        bench.teardown();
        return 1;
    }

    let mut server = AliceServer::new(Arc::new(config), cli.file.clone(), bench);
    match server.serve() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("server error: {e}");
            1
        }
    }
}
