//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section is optional; missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Request ledger behavior.
    pub ledger: OperationsConfig,

    /// Timer resolution.
    pub timers: TimerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Simulated peer used by the binary.
    pub simulation: SimulationConfig,
}

/// Request ledger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Grace after the first request timeout before the connection is reported stale.
    pub connection_stale_period_ms: u64,

    /// Interval between sanity sweeps.
    pub sweep_interval_ms: u64,

    /// Timeout applied to requests that do not carry their own.
    pub default_request_timeout_ms: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            connection_stale_period_ms: 1_500,
            sweep_interval_ms: 10_000,
            default_request_timeout_ms: 1_000,
        }
    }
}

/// Timer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimerConfig {
    /// How often the driver drains expired timers.
    pub tick_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Behavior of the simulated peer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of outbound calls to issue.
    pub requests: u32,

    /// Fraction of calls the peer never answers.
    pub drop_ratio: f64,

    /// Fraction of answers delivered twice.
    pub duplicate_ratio: f64,

    /// Fraction of answers delivered after the request timed out.
    pub late_ratio: f64,

    /// Number of inbound calls the peer sends us.
    pub inbound_requests: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: 200,
            drop_ratio: 0.05,
            duplicate_ratio: 0.05,
            late_ratio: 0.05,
            inbound_requests: 50,
        }
    }
}
