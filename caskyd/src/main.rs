use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use casky::storage::engine::{Engine, EngineConfig, OpenOutcome};
use caskyd::config::{Args, Settings};
use caskyd::{server, signal, trace};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("caskyd: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::resolve(args)?;

    let level = trace::normalize_level(&settings.log_level);
    let _guards = trace::init_logging(&settings.log_dir, level)
        .context("failed to initialize logging")?;
    info!("caskyd starting with settings: {:?}", settings);

    let config = EngineConfig { sync_on_write: settings.sync_on_write, ..EngineConfig::default() };
    let outcome = Engine::open(&settings.path, config)
        .with_context(|| format!("failed to open database at {:?}", settings.path))?;
    let engine = match outcome {
        OpenOutcome::Clean(engine) => engine,
        OpenOutcome::Corrupt(engine, err) => {
            warn!("recovery halted on a bad record ({}), compaction is advisable", err);
            engine
        }
    };
    let engine = Arc::new(engine);

    // Always 127.0.0.1: caskyd only ever serves over a loopback socket.
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        "caskyd {} listening on {} (thread-safe)",
        casky::version(),
        addr
    );

    let shutdown_rx = signal::install().context("failed to install signal handler")?;
    server::serve(listener, Arc::clone(&engine), shutdown_rx).await;

    info!("closing engine and exiting");
    match Arc::try_unwrap(engine) {
        Ok(engine) => {
            if let Err(err) = engine.close() {
                error!("error while closing engine: {}", err);
            }
        }
        Err(_) => warn!("a connection task outlived the shutdown grace period; skipping explicit close"),
    }

    Ok(())
}
