//! Linkfwd - Entry Point
//!
//! Runs the forwarding daemon or edits/inspects the desired port list.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use linkfwd::pool::RelayBufferPool;
use linkfwd::probe::default_probe;
use linkfwd::state::FileDesiredState;
use linkfwd::{Config, FleetManager, VERSION};

/// Linkfwd - relay local TCP ports to a remote host across a link
#[derive(Parser)]
#[command(name = "linkfwd")]
#[command(version = VERSION)]
#[command(about = "TCP port forwarding engine for point-to-point links")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/linkfwd/config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured forward and serve until interrupted
    Run,
    /// Add forwards (comma separated ports, e.g. "80,443")
    Add { ports: String },
    /// Remove forwards (comma separated ports)
    Remove { ports: String },
    /// List configured forwards and whether they are listening
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Set the remote host every forward relays to
    SetRemote { host: String },
    /// Relay a local port to a different port on the remote host
    Remap {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        local: u16,
        /// Remote port; the same as LOCAL removes the remap
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        remote: u16,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    linkfwd::util::init_tracing(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.effective_workers())
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(dispatch(cli, config))
}

async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let state = Arc::new(
        FileDesiredState::open(&config.forward.state_path)
            .context("Failed to open desired state")?,
    );

    match &cli.command {
        Commands::SetRemote { host } => {
            state.set_remote_target(Some(host.clone()))?;
            println!(
                "Remote forward target set to {} ({})",
                host,
                state.path().display()
            );
            return Ok(());
        }
        Commands::Remap { local, remote } => {
            state.set_remote_port(*local, *remote)?;
            println!(
                "Port {} now relays to remote port {} ({})",
                local,
                remote,
                state.path().display()
            );
            return Ok(());
        }
        _ => {}
    }

    let pool = RelayBufferPool::new(config.pool.relay_buffers, config.forward.buffer_size);
    let fleet = Arc::new(FleetManager::new(
        config.forward.clone(),
        state,
        default_probe(),
        pool,
    ));

    match cli.command {
        Commands::Run => run_daemon(&config, fleet).await,
        Commands::Add { ports } => {
            println!("{}", fleet.create_forwards(&ports));
            Ok(())
        }
        Commands::Remove { ports } => {
            println!("{}", fleet.remove_forwards(&ports).await);
            Ok(())
        }
        Commands::List { json } => {
            print_forwards(&fleet, json)?;
            Ok(())
        }
        Commands::SetRemote { .. } | Commands::Remap { .. } => Ok(()),
    }
}

async fn run_daemon(config: &Config, fleet: Arc<FleetManager>) -> Result<()> {
    info!(
        version = VERSION,
        state_path = ?config.forward.state_path,
        workers = config.runtime.effective_workers(),
        "Starting linkfwd"
    );

    if config.metrics.enabled {
        linkfwd::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }
    if let Some(api_addr) = config.metrics.api_addr {
        linkfwd::metrics::start_api_server(api_addr, fleet.clone())
            .with_context(|| format!("Failed to start status API on {}", api_addr))?;
    }

    match fleet.start_all() {
        Ok(report) => {
            for line in report.lines() {
                if line.is_ok() {
                    info!(port = %line.subject, "{}", line.message());
                } else {
                    warn!(port = %line.subject, "{}", line.message());
                }
            }
            if report.is_empty() {
                warn!("{}", report);
            }
        }
        Err(e) => {
            error!(error = %e, "Cannot start port forwards");
            return Err(e.into());
        }
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping forwards...");
    fleet.shutdown().await;

    info!("Linkfwd stopped");
    Ok(())
}

fn print_forwards(fleet: &FleetManager, json: bool) -> Result<()> {
    let forwards = fleet.list_forwards();

    if json {
        println!("{}", serde_json::to_string_pretty(&forwards)?);
        return Ok(());
    }

    if forwards.is_empty() {
        println!("No port forwards configured");
        return Ok(());
    }

    println!(
        "{:<7} {:<24} {:<8} {:>8} {:>12} {:>12}",
        "PORT", "TARGET", "STATUS", "SESSIONS", "SENT", "RECEIVED"
    );
    for entry in forwards {
        let status = if entry.running { "running" } else { "stopped" };
        println!(
            "{:<7} {:<24} {:<8} {:>8} {:>12} {:>12}",
            entry.port,
            entry.target,
            status,
            entry.active_sessions,
            entry.stats.total_bytes_sent,
            entry.stats.total_bytes_received
        );
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
