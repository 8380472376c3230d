//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! ledger / connection / driver produce:
//!     → tracing events (structured fields: connection_id, direction, id)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, human or JSON)
//!     → Prometheus scrape endpoint when enabled
//! ```
//!
//! # Design Decisions
//! - Unknown-id frames log at info; lingering and inconsistent slots at warn
//! - Metrics are cheap and safe to call without a recorder

pub mod logging;
pub mod metrics;
