#![forbid(unsafe_code)]

//! `dummy-discovery` — reference discovery that invents ports.
//!
//! Serves the pluggable discovery protocol on stdin/stdout. Each session
//! reports two ports immediately, then twice adds and removes a fresh port
//! one interval apart, and finally reports an unrecoverable error. Every
//! fifth `START_SYNC` (or `START`) is refused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use pluggable_discovery::models::{Port, Properties};
use pluggable_discovery::server::{Discovery, DiscoveryFuture, Server, SyncSender};
use pluggable_discovery::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "dummy-discovery", about = "Dummy pluggable discovery", version, long_about = None)]
struct Cli {
    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Delay between generated port events, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,
}

/// Number of add/remove rounds after the initial burst.
const ROUNDS: usize = 2;

/// Ports announced as soon as a session starts.
const INITIAL_PORTS: usize = 2;

struct DummyDiscovery {
    interval: Duration,
    start_sync_count: u32,
    counter: Arc<AtomicU64>,
    session: Option<CancellationToken>,
}

impl DummyDiscovery {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            start_sync_count: 0,
            counter: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    fn halt(&mut self) {
        if let Some(cancel) = self.session.take() {
            cancel.cancel();
        }
    }
}

impl Discovery for DummyDiscovery {
    fn hello(&mut self, user_agent: &str, protocol_version: u32) -> DiscoveryFuture<'_, Result<()>> {
        info!(user_agent, protocol_version, "hello from controller");
        Box::pin(async { Ok(()) })
    }

    fn start_sync(&mut self, events: SyncSender) -> DiscoveryFuture<'_, Result<()>> {
        Box::pin(async move {
            self.start_sync_count += 1;
            if self.start_sync_count % 5 == 0 {
                return Err(AppError::Discovery(
                    "could not start_sync every 5 times".into(),
                ));
            }

            self.halt();
            let cancel = CancellationToken::new();
            self.session = Some(cancel.clone());
            tokio::spawn(emit_ports(
                events,
                Arc::clone(&self.counter),
                self.interval,
                cancel,
            ));
            Ok(())
        })
    }

    fn stop(&mut self) -> DiscoveryFuture<'_, Result<()>> {
        self.halt();
        Box::pin(async { Ok(()) })
    }

    fn quit(&mut self) -> DiscoveryFuture<'_, ()> {
        self.halt();
        Box::pin(async {})
    }
}

/// Session script: initial burst, add/remove rounds, then failure.
async fn emit_ports(
    events: SyncSender,
    counter: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
) {
    for _ in 0..INITIAL_PORTS {
        if !events.port_added(dummy_port(&counter)).await {
            return;
        }
    }

    for _ in 0..ROUNDS {
        if !pause(&cancel, interval).await {
            return;
        }
        let port = dummy_port(&counter);
        let gone = port.identity();
        if !events.port_added(port).await {
            return;
        }

        if !pause(&cancel, interval).await {
            return;
        }
        if !events.port_removed(gone).await {
            return;
        }
    }

    events.fail("unrecoverable error, cannot send more events").await;
    cancel.cancelled().await;
    debug!("dummy session halted");
}

/// Sleep for `interval`; `false` if the session was halted meanwhile.
async fn pause(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}

fn dummy_port(counter: &AtomicU64) -> Port {
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
    let mut port = Port::new(n.to_string(), "dummy");
    port.address_label = "Dummy upload port".into();
    port.protocol_label = "Dummy protocol".into();
    port.properties = [
        ("vid", "0x2341".to_owned()),
        ("pid", "0x0041".to_owned()),
        ("mac", (n * 384_782).to_string()),
    ]
    .into_iter()
    .collect::<Properties>();
    port
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    let result = runtime.block_on(async {
        let discovery = DummyDiscovery::new(Duration::from_millis(args.interval_ms));
        Server::new(discovery)
            .run(tokio::io::stdin(), tokio::io::stdout())
            .await
    });
    // The stdin reader thread cannot be interrupted; don't wait for it.
    runtime.shutdown_background();
    result
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
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
