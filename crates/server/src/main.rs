//! `shelfd` entry point.

use clap::Parser;
use shelf_server::{lifecycle, ServerConfig};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = ServerConfig::parse();

    // Diagnostics go to stderr; job output files own stdout-adjacent
    // bytes. SHELF_LOG picks the level, defaulting to info.
    let filter = EnvFilter::try_from_env("SHELF_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = lifecycle::run(config) {
        eprintln!("{}", err);
        process::exit(1);
    }
}
