//! xmldex CLI binary.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use xmldex::cli::args::*;
use xmldex::cli::commands::*;

fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_env("XMLDEX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 2)
        .init();
}

fn main() {
    let args = XmldexArgs::parse();
    init_tracing(args.verbosity());

    if let Err(e) = execute_command(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
