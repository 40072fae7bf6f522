//! `framelink` server binary.
//!
//! Parses CLI arguments, resolves the backend library and runs the
//! bridge server until interrupted or the listener fails.

mod cli;

use std::net::SocketAddr;

use clap::Parser;
use framelink::{backend, server::BridgeServer};
use log::info;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::Cli::parse();

    // Backend status output and server logging share one subscriber;
    // `log` records from the library are captured as tracing events.
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let factory = backend::resolve(&cli.library)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let server = BridgeServer::new(move || factory()).bind(addr)?;
    info!("listening: addr={}", server.local_addr()?);
    server.run().await?;
    Ok(())
}
