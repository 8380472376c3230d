//! Event loop owning one connection's ledger.
//!
//! # Responsibilities
//! - Serialize every ledger mutation onto a single task
//! - Deliver fired timers on each timer tick
//! - Run the sanity sweep on its own interval
//! - Destroy the ledger on shutdown and hand back a final snapshot

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;

use crate::config::LedgerConfig;
use crate::ledger::{
    ErrorContext, LedgerOptions, LedgerSnapshot, Request, RequestId, ResponseContext,
    StaleNotifier, SweepReport,
};
use crate::net::connection::{Connection, ConnectionInfo};
use crate::timers::{Clock, TimeHeap};

const COMMAND_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection driver has stopped")]
    Closed,
}

/// Work submitted to the driver from other tasks.
#[derive(Debug)]
pub enum ConnectionCommand {
    Send(Request),
    Accept(Request),
    Response(ResponseContext),
    Error(ErrorContext),
    CompleteInbound(RequestId),
    Sweep(oneshot::Sender<SweepReport>),
    Snapshot(oneshot::Sender<LedgerSnapshot>),
}

/// Cloneable sender side of a driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<ConnectionCommand>,
}

impl DriverHandle {
    async fn submit(&self, command: ConnectionCommand) -> Result<(), DriverError> {
        self.tx.send(command).await.map_err(|_| DriverError::Closed)
    }

    /// Queue an outbound registration.
    ///
    /// The timeout starts when the driver processes the command, not when it is submitted.
    pub async fn send_request(&self, req: Request) -> Result<(), DriverError> {
        self.submit(ConnectionCommand::Send(req)).await
    }

    /// Queue an inbound registration. Like [`send_request`](Self::send_request), the
    /// timeout starts once the driver gets to it.
    pub async fn accept_request(&self, req: Request) -> Result<(), DriverError> {
        self.submit(ConnectionCommand::Accept(req)).await
    }

    pub async fn response(&self, response: ResponseContext) -> Result<(), DriverError> {
        self.submit(ConnectionCommand::Response(response)).await
    }

    pub async fn error_frame(&self, error: ErrorContext) -> Result<(), DriverError> {
        self.submit(ConnectionCommand::Error(error)).await
    }

    pub async fn complete_inbound(&self, id: RequestId) -> Result<(), DriverError> {
        self.submit(ConnectionCommand::CompleteInbound(id)).await
    }

    /// Run a sweep now instead of waiting for the interval.
    pub async fn sweep(&self) -> Result<SweepReport, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.submit(ConnectionCommand::Sweep(tx)).await?;
        rx.await.map_err(|_| DriverError::Closed)
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.submit(ConnectionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| DriverError::Closed)
    }
}

pub struct ConnectionDriver {
    connection: Connection,
    heap: Arc<TimeHeap>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<ConnectionCommand>,
    timer_tick: Duration,
    sweep_interval: Duration,
}

impl ConnectionDriver {
    /// Build a connection with its own time heap, plus the handle to feed it.
    pub fn new(
        info: ConnectionInfo,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn StaleNotifier>,
        config: &LedgerConfig,
    ) -> (Self, DriverHandle) {
        let heap = Arc::new(TimeHeap::new(Arc::clone(&clock)));
        let connection = Connection::new(
            info,
            LedgerOptions {
                clock: Arc::clone(&clock),
                scheduler: heap.clone(),
                notifier,
                connection_stale_period_ms: config.ledger.connection_stale_period_ms,
            },
        );
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        (
            Self {
                connection,
                heap,
                clock,
                commands: rx,
                timer_tick: Duration::from_millis(config.timers.tick_interval_ms),
                sweep_interval: Duration::from_millis(config.ledger.sweep_interval_ms),
            },
            DriverHandle { tx },
        )
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LedgerSnapshot {
        let info = self.connection.info().clone();
        tracing::info!(
            connection_id = %info.id,
            remote_addr = %info.remote_addr,
            timer_tick_ms = self.timer_tick.as_millis() as u64,
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "Connection driver starting"
        );

        let mut timer_ticker = time::interval(self.timer_tick);
        let mut sweep_ticker = time::interval(self.sweep_interval);
        // Skip the immediate first tick; nothing can linger yet.
        sweep_ticker.tick().await;

        loop {
            tokio::select! {
                _ = timer_ticker.tick() => {
                    self.tick_timers();
                }
                _ = sweep_ticker.tick() => {
                    self.connection.sanity_sweep();
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!(
                            connection_id = %info.id,
                            "All driver handles dropped, exiting loop"
                        );
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(
                            connection_id = %info.id,
                            "Connection driver received shutdown signal, exiting loop"
                        );
                        break;
                    }
                }
            }
        }

        self.connection.ledger_mut().destroy();
        self.connection.ledger().snapshot()
    }

    fn tick_timers(&mut self) {
        let now = self.clock.now();
        for fired in self.heap.expire(now) {
            self.connection.on_timer(fired);
        }
    }

    fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Send(req) => {
                self.connection.send_request(req);
            }
            ConnectionCommand::Accept(req) => {
                self.connection.accept_request(req);
            }
            ConnectionCommand::Response(response) => {
                self.connection.handle_response(response);
            }
            ConnectionCommand::Error(error) => {
                self.connection.handle_error_frame(error);
            }
            ConnectionCommand::CompleteInbound(id) => {
                self.connection.complete_inbound(id);
            }
            ConnectionCommand::Sweep(reply) => {
                let _ = reply.send(self.connection.sanity_sweep());
            }
            ConnectionCommand::Snapshot(reply) => {
                let _ = reply.send(self.connection.ledger().snapshot());
            }
        }
    }
}
