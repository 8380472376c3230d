//! Per-connection request ledger for an RPC transport.

pub mod config;
pub mod ledger;
pub mod net;
pub mod observability;
pub mod timers;

pub use config::LedgerConfig;
pub use ledger::{OperationsLedger, Request, RequestId};
pub use net::{Connection, ConnectionDriver, DriverHandle};
