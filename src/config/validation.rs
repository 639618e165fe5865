//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, sizes > 0)
//! - Check URLs and endpoint paths are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GuardConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.transport.base_url) {
        Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
            errors.push(ValidationError::new(
                "transport.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("transport.base_url", e.to_string())),
    }
    if config.transport.timeout_secs == 0 {
        errors.push(ValidationError::new("transport.timeout_secs", "must be greater than 0"));
    }

    let refresh = &config.refresh;
    if !refresh.endpoint.starts_with('/') {
        errors.push(ValidationError::new("refresh.endpoint", "must start with '/'"));
    }
    if !refresh.login_path.starts_with('/') {
        errors.push(ValidationError::new("refresh.login_path", "must start with '/'"));
    }
    if refresh.failure_threshold == 0 {
        errors.push(ValidationError::new("refresh.failure_threshold", "must be greater than 0"));
    }
    if refresh.circuit_cooldown_ms == 0 {
        errors.push(ValidationError::new("refresh.circuit_cooldown_ms", "must be greater than 0"));
    }
    if refresh.silent_refresh_interval_secs == 0 {
        errors.push(ValidationError::new(
            "refresh.silent_refresh_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.queue.max_size == 0 {
        errors.push(ValidationError::new("queue.max_size", "must be greater than 0"));
    }

    for (field, list) in [
        ("endpoints.skip", &config.endpoints.skip),
        ("endpoints.public", &config.endpoints.public),
        ("endpoints.auth_exempt", &config.endpoints.auth_exempt),
    ] {
        for path in list.iter().filter(|p| !p.starts_with('/')) {
            errors.push(ValidationError::new(field, format!("'{}' must start with '/'", path)));
        }
    }

    if config.notifier.channel.trim().is_empty() {
        errors.push(ValidationError::new("notifier.channel", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
