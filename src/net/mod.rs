//! Connection layer subsystem.
//!
//! # Data Flow
//! ```text
//! Frames and local calls (as ConnectionCommand)
//!     → driver.rs (single task, select loop)
//!     → connection.rs (route to ledger operations)
//!     → ledger (registration, lookup, finalization)
//!
//! Timer tick:
//!     driver.rs → TimeHeap::expire → connection.rs::on_timer
//! ```
//!
//! # Design Decisions
//! - One driver task per connection; the ledger is never shared
//! - Socket I/O and framing live above this layer
//! - Stale notifications leave through a channel; closing is the owner's call

pub mod connection;
pub mod driver;

pub use connection::{Connection, ConnectionDirection, ConnectionId, ConnectionInfo, TimerOutcome};
pub use driver::{ConnectionCommand, ConnectionDriver, DriverError, DriverHandle};
