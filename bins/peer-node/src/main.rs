//! Peer Node Binary
//!
//! Runs one peer in the gossipnet overlay: registers with the seed
//! cluster, builds a power-law overlay and gossips until the lifetime cap.

use clap::Parser;
use gossipnet_core::{NodeId, SeedDirectory};
use gossipnet_peer::{PeerConfig, PeerNode};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "peer-node")]
#[command(about = "Gossipnet peer node (gossip data plane)")]
struct Args {
    /// Bind host
    #[arg(long)]
    host: String,

    /// Bind port
    #[arg(long)]
    port: u16,

    /// Seed list config file (one HOST:PORT or HOST,PORT per line)
    #[arg(long)]
    config: PathBuf,

    /// Append-only event log destination
    #[arg(long, default_value = "outputfile.txt")]
    log_file: PathBuf,

    /// RNG seed for overlay sampling (reproducible neighbor selection)
    #[arg(long)]
    overlay_seed: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let id = NodeId::new(args.host, args.port);

    let directory = match SeedDirectory::load(&args.config) {
        Ok(dir) => dir,
        Err(e) => {
            error!("config error: {e}");
            return ExitCode::from(1);
        }
    };

    let mut cfg = PeerConfig::new(id, directory);
    cfg.log_file = Some(args.log_file);
    cfg.overlay_seed = args.overlay_seed;

    let node = match PeerNode::new(cfg) {
        Ok(node) => node,
        Err(e) => {
            error!("startup error: {e}");
            return ExitCode::from(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match node.run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_startup_error() => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(2)
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
