//! Request ledger simulator.
//!
//! Drives one connection against a simulated peer that drops, duplicates
//! and delays its answers, then prints the final ledger snapshot.
//!
//! ```text
//!   simulated calls ──▶ DriverHandle ──▶ ConnectionDriver (one task)
//!                                            │
//!                              ┌─────────────┼──────────────┐
//!                              ▼             ▼              ▼
//!                          timer tick     commands      sweep tick
//!                              │             │              │
//!                              └──────▶ OperationsLedger ◀──┘
//!                                            │
//!                                   stale events ──▶ main
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use rpc_ledger::config::{load_config, LedgerConfig};
use rpc_ledger::ledger::{
    Arg1, ErrorContext, Request, RequestId, ResponseContext, StaleEvent, TOMBSTONE_TTL_OFFSET_MS,
};
use rpc_ledger::net::{ConnectionDirection, ConnectionDriver, ConnectionInfo, DriverHandle};
use rpc_ledger::observability::{logging, metrics};
use rpc_ledger::timers::SystemClock;

#[derive(Parser)]
#[command(name = "rpc-ledger")]
#[command(
    about = "Simulate a connection's request ledger against a misbehaving peer",
    long_about = None
)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of outbound calls.
    #[arg(short, long)]
    requests: Option<u32>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

/// What the simulated peer does with one call.
enum PeerBehavior {
    Answer { delay_ms: u64 },
    Fail { delay_ms: u64 },
    Duplicate { delay_ms: u64 },
    Late,
    Drop,
}

fn pick_behavior(config: &LedgerConfig) -> PeerBehavior {
    let sim = &config.simulation;
    let timeout = config.ledger.default_request_timeout_ms;
    let delay_ms = fastrand::u64(1..=(timeout / 4).max(1));

    let roll = fastrand::f64();
    if roll < sim.drop_ratio {
        PeerBehavior::Drop
    } else if roll < sim.drop_ratio + sim.late_ratio {
        PeerBehavior::Late
    } else if roll < sim.drop_ratio + sim.late_ratio + sim.duplicate_ratio {
        PeerBehavior::Duplicate { delay_ms }
    } else if fastrand::u8(..10) == 0 {
        PeerBehavior::Fail { delay_ms }
    } else {
        PeerBehavior::Answer { delay_ms }
    }
}

fn response(id: RequestId) -> ResponseContext {
    ResponseContext {
        id,
        code: 0,
        arg1: Arg1::Buffered(b"echo".to_vec()),
    }
}

async fn play_outbound(
    handle: DriverHandle,
    id: RequestId,
    behavior: PeerBehavior,
    timeout_ms: u64,
) {
    let result = match behavior {
        PeerBehavior::Drop => Ok(()),
        PeerBehavior::Answer { delay_ms } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            handle.response(response(id)).await
        }
        PeerBehavior::Fail { delay_ms } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            handle
                .error_frame(ErrorContext {
                    original_id: id,
                    code: 0x03,
                    message: "busy".to_string(),
                })
                .await
        }
        PeerBehavior::Duplicate { delay_ms } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            match handle.response(response(id)).await {
                Ok(()) => handle.response(response(id)).await,
                Err(e) => Err(e),
            }
        }
        PeerBehavior::Late => {
            tokio::time::sleep(Duration::from_millis(timeout_ms + 100)).await;
            handle.response(response(id)).await
        }
    };

    if let Err(e) = result {
        tracing::debug!(id = %id, error = %e, "Simulated peer could not deliver frame");
    }
}

async fn play_inbound(handle: DriverHandle, id: RequestId, timeout_ms: u64) {
    if let Err(e) = handle.accept_request(Request::new(id, timeout_ms)).await {
        tracing::debug!(id = %id, error = %e, "Could not register inbound call");
        return;
    }

    // One in ten handlers hangs; the sweep has to reclaim those.
    if fastrand::u8(..10) == 0 {
        return;
    }
    tokio::time::sleep(Duration::from_millis(fastrand::u64(1..=timeout_ms / 2 + 1))).await;
    if let Err(e) = handle.complete_inbound(id).await {
        tracing::debug!(id = %id, error = %e, "Could not complete inbound call");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(requests) = cli.requests {
        config.simulation.requests = requests;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!("rpc-ledger v0.1.0 starting");

    tracing::info!(
        stale_period_ms = config.ledger.connection_stale_period_ms,
        sweep_interval_ms = config.ledger.sweep_interval_ms,
        tick_interval_ms = config.timers.tick_interval_ms,
        requests = config.simulation.requests,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let (stale_tx, mut stale_rx) = mpsc::unbounded_channel::<StaleEvent>();
    let (driver, handle) = ConnectionDriver::new(
        ConnectionInfo::new("127.0.0.1:21300", ConnectionDirection::Outbound),
        Arc::new(SystemClock::new()),
        Arc::new(stale_tx),
        &config,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_task = tokio::spawn(driver.run(shutdown_rx));

    let stale_task = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(event) = stale_rx.recv().await {
            count += 1;
            tracing::warn!(
                connection_id = %event.connection.id,
                error = %event.error,
                "Peer looks unresponsive; a real transport would reset the connection"
            );
        }
        count
    });

    let timeout_ms = config.ledger.default_request_timeout_ms;
    let mut peers = JoinSet::new();

    for n in 1..=config.simulation.requests {
        let id = RequestId::from(n);
        handle
            .send_request(Request::new(id, timeout_ms).with_target("echo", "ping"))
            .await?;
        peers.spawn(play_outbound(handle.clone(), id, pick_behavior(&config), timeout_ms));
    }
    for n in 1..=config.simulation.inbound_requests {
        peers.spawn(play_inbound(handle.clone(), RequestId::from(n), timeout_ms));
    }

    while peers.join_next().await.is_some() {}

    // Let outstanding timeouts fire and tombstones age out.
    tokio::time::sleep(Duration::from_millis(
        2 * timeout_ms + TOMBSTONE_TTL_OFFSET_MS + config.timers.tick_interval_ms,
    ))
    .await;

    let report = handle.sweep().await?;
    tracing::info!(
        reclaimed_in = report.reclaimed_in,
        reclaimed_out = report.reclaimed_out,
        inconsistent = report.inconsistent,
        "Final sanity sweep"
    );

    let _ = shutdown_tx.send(true);
    let snapshot = driver_task.await?;
    drop(handle);
    let stale_notifications = stale_task.await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    tracing::info!(stale_notifications, "Simulation complete");
    Ok(())
}
