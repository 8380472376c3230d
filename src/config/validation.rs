//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (periods and intervals > 0, ratios within 0..=1)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LedgerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::LedgerConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be between 0 and 1, got {value}")]
    Ratio { field: &'static str, value: f64 },

    #[error("metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

pub fn validate_config(config: &LedgerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let non_zero = [
        (
            "ledger.connection_stale_period_ms",
            config.ledger.connection_stale_period_ms,
        ),
        ("ledger.sweep_interval_ms", config.ledger.sweep_interval_ms),
        (
            "ledger.default_request_timeout_ms",
            config.ledger.default_request_timeout_ms,
        ),
        ("timers.tick_interval_ms", config.timers.tick_interval_ms),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let ratios = [
        ("simulation.drop_ratio", config.simulation.drop_ratio),
        ("simulation.duplicate_ratio", config.simulation.duplicate_ratio),
        ("simulation.late_ratio", config.simulation.late_ratio),
    ];
    for (field, value) in ratios {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::Ratio { field, value });
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
