//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LedgerConfig (validated, immutable)
//!     → read once when a connection driver is built
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The tombstone grace offset is fixed, not configurable

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::LedgerConfig;
pub use schema::{ObservabilityConfig, OperationsConfig, SimulationConfig, TimerConfig};
