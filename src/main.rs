#![forbid(unsafe_code)]

//! `discovery-probe` — drive pluggable discoveries from the command line.
//!
//! `list` runs each discovery once and prints the ports it knows about.
//! `watch` keeps every discovery in sync mode and prints one JSON line per
//! event until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use pluggable_discovery::client::SpawnConfig;
use pluggable_discovery::models::{Event, Port};
use pluggable_discovery::{AppError, Client, ClientOptions, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "discovery-probe", about = "Drive pluggable discovery tools", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: ProbeCommand,
}

#[derive(Debug, Subcommand)]
enum ProbeCommand {
    /// Print the ports each discovery currently reports.
    List {
        #[command(flatten)]
        target: Target,
    },
    /// Stream add/remove events until interrupted.
    Watch {
        /// Event channel capacity per discovery; defaults to the config value.
        #[arg(long)]
        capacity: Option<usize>,

        #[command(flatten)]
        target: Target,
    },
}

/// Ad-hoc discovery given on the command line instead of the config file.
#[derive(Debug, Args)]
struct Target {
    /// Identifier for the ad-hoc discovery.
    #[arg(long, default_value = "adhoc")]
    id: String,

    /// Discovery command line, after `--`.
    #[arg(last = true)]
    discovery: Vec<String>,
}

/// One line of `list` output.
#[derive(Debug, Serialize)]
struct ListLine<'a> {
    discovery_id: &'a str,
    ports: &'a [Port],
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!(discoveries = config.discoveries.len(), "configuration loaded");

    match args.command {
        ProbeCommand::List { target } => {
            let clients = build_clients(&config, target)?;
            list_all(clients).await
        }
        ProbeCommand::Watch { capacity, target } => {
            let capacity = capacity.unwrap_or(config.event_capacity);
            let clients = build_clients(&config, target)?;
            watch_all(&clients, capacity).await
        }
    }
}

/// Clients for the ad-hoc discovery if one was given, else for the config.
fn build_clients(config: &GlobalConfig, target: Target) -> Result<Vec<Arc<Client>>> {
    let options = ClientOptions::from(config);

    if !target.discovery.is_empty() {
        let spawn = SpawnConfig::from_argv(target.discovery)?;
        return Ok(vec![Arc::new(Client::new(target.id, spawn, options))]);
    }

    if config.discoveries.is_empty() {
        return Err(AppError::Config(
            "no discoveries configured; pass --config or a command after `--`".into(),
        ));
    }

    Ok(config
        .discoveries
        .iter()
        .map(|d| Arc::new(Client::new(d.id.clone(), d.spawn_config(), options.clone())))
        .collect())
}

async fn list_all(clients: Vec<Arc<Client>>) -> Result<()> {
    let mut failures = 0usize;

    for client in clients {
        match list_one(&client).await {
            Ok(ports) => print_json(&ListLine {
                discovery_id: client.id(),
                ports: &ports,
            })?,
            Err(err) => {
                error!(discovery_id = %client, %err, "listing ports failed");
                failures += 1;
            }
        }
        client.quit().await;
    }

    if failures > 0 {
        return Err(AppError::Discovery(format!(
            "{failures} discovery(ies) failed to list ports"
        )));
    }
    Ok(())
}

async fn list_one(client: &Client) -> Result<Vec<Port>> {
    client.run().await?;
    client.start().await?;
    client.list().await
}

async fn watch_all(clients: &[Arc<Client>], capacity: usize) -> Result<()> {
    let (merged_tx, mut merged) = mpsc::channel::<Event>(capacity.max(1));
    let mut forwarders = Vec::new();

    for client in clients {
        let events = match start_watch(client, capacity).await {
            Ok(events) => events,
            Err(err) => {
                error!(discovery_id = %client, %err, "starting sync failed");
                continue;
            }
        };
        forwarders.push(tokio::spawn(forward(events, merged_tx.clone())));
    }
    drop(merged_tx);

    if forwarders.is_empty() {
        shutdown_clients(clients).await;
        return Err(AppError::Discovery("no discovery could be started".into()));
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            event = merged.recv() => match event {
                Some(event) => {
                    if let Err(err) = print_json(&event) {
                        break Err(err);
                    }
                }
                None => {
                    warn!("all event channels closed");
                    break Ok(());
                }
            },
            () = &mut shutdown => {
                info!("shutdown signal received");
                break Ok(());
            }
        }
    };

    // Closing the merged channel unblocks forwarders so retiring the
    // per-client channels cannot wait on a full buffer.
    drop(merged);
    shutdown_clients(clients).await;
    for handle in forwarders {
        handle.abort();
    }
    result
}

async fn start_watch(client: &Client, capacity: usize) -> Result<mpsc::Receiver<Event>> {
    client.run().await?;
    client.start_sync(capacity).await
}

/// Copy one client's events into the merged channel.
async fn forward(mut events: mpsc::Receiver<Event>, merged: mpsc::Sender<Event>) {
    while let Some(event) = events.recv().await {
        if merged.send(event).await.is_err() {
            break;
        }
    }
}

async fn shutdown_clients(clients: &[Arc<Client>]) {
    let handles: Vec<_> = clients
        .iter()
        .map(|client| {
            let client = Arc::clone(client);
            tokio::spawn(async move { client.quit().await })
        })
        .collect();
    for handle in handles {
        if let Err(err) = handle.await {
            error!(%err, "quit task failed");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|err| AppError::Io(format!("failed to encode output: {err}")))?;
    println!("{line}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
