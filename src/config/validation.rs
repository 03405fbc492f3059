//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, confirmations >= 1)
//! - Check cross-field constraints (reload vs tick, age ceiling vs resubmit delay)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ManagerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ManagerConfig;

/// One failed semantic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `tracker.interval_secs`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check everything serde cannot.
pub fn validate_config(config: &ManagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Submission
    let submission = &config.submission;
    if submission.services.is_empty() {
        errors.push(ValidationError::new("submission.services", "at least one service is required"));
    }
    if submission.services.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::new("submission.services", "service names must not be blank"));
    }
    let unique: HashSet<&String> = submission.services.iter().collect();
    if unique.len() != submission.services.len() {
        errors.push(ValidationError::new("submission.services", "duplicate service name"));
    }
    for (field, ceiling) in [
        ("submission.max_gas_price", submission.max_gas_price),
        ("submission.max_system_fee", submission.max_system_fee),
        ("submission.max_network_fee", submission.max_network_fee),
    ] {
        if ceiling == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if submission.max_script_len == 0 {
        errors.push(ValidationError::new("submission.max_script_len", "must be > 0"));
    }
    if submission.sign_timeout_secs == 0 {
        errors.push(ValidationError::new("submission.sign_timeout_secs", "must be > 0"));
    }
    if submission.broadcast_timeout_secs == 0 {
        errors.push(ValidationError::new("submission.broadcast_timeout_secs", "must be > 0"));
    }

    // Tracker
    let tracker = &config.tracker;
    if tracker.interval_secs == 0 {
        errors.push(ValidationError::new("tracker.interval_secs", "must be > 0"));
    }
    if tracker.reload_interval_secs < tracker.interval_secs {
        errors.push(ValidationError::new(
            "tracker.reload_interval_secs",
            "must be >= tracker.interval_secs",
        ));
    }
    if tracker.required_confirmations == 0 {
        errors.push(ValidationError::new("tracker.required_confirmations", "must be >= 1"));
    }
    if tracker.query_timeout_secs == 0 {
        errors.push(ValidationError::new("tracker.query_timeout_secs", "must be > 0"));
    }
    if tracker.concurrency == 0 {
        errors.push(ValidationError::new("tracker.concurrency", "must be > 0"));
    }
    if tracker.max_pending_age_secs <= config.resubmit.resubmit_after_secs {
        errors.push(ValidationError::new(
            "tracker.max_pending_age_secs",
            "must be > resubmit.resubmit_after_secs",
        ));
    }

    // Resubmit
    if config.resubmit.resubmit_after_secs == 0 {
        errors.push(ValidationError::new("resubmit.resubmit_after_secs", "must be > 0"));
    }
    if config.resubmit.max_backoff_secs < config.resubmit.resubmit_after_secs {
        errors.push(ValidationError::new(
            "resubmit.max_backoff_secs",
            "must be >= resubmit.resubmit_after_secs",
        ));
    }

    // Nodes
    let nodes = &config.nodes;
    if nodes.endpoints.is_empty() {
        errors.push(ValidationError::new("nodes.endpoints", "at least one endpoint is required"));
    }
    for (i, endpoint) in nodes.endpoints.iter().enumerate() {
        if !matches!(endpoint.url.scheme(), "http" | "https") {
            errors.push(ValidationError::new(
                format!("nodes.endpoints[{}].url", i),
                format!("unsupported scheme '{}'", endpoint.url.scheme()),
            ));
        }
        if endpoint.weight == 0 {
            errors.push(ValidationError::new(
                format!("nodes.endpoints[{}].weight", i),
                "must be > 0",
            ));
        }
    }
    let unique: HashSet<&str> = nodes.endpoints.iter().map(|e| e.url.as_str()).collect();
    if unique.len() != nodes.endpoints.len() {
        errors.push(ValidationError::new("nodes.endpoints", "duplicate endpoint url"));
    }
    if nodes.probe_interval_secs == 0 {
        errors.push(ValidationError::new("nodes.probe_interval_secs", "must be > 0"));
    }
    if nodes.probe_timeout_secs == 0 {
        errors.push(ValidationError::new("nodes.probe_timeout_secs", "must be > 0"));
    }
    if nodes.unhealthy_threshold == 0 {
        errors.push(ValidationError::new("nodes.unhealthy_threshold", "must be >= 1"));
    }
    if nodes.reset_repeat_secs == Some(0) {
        errors.push(ValidationError::new("nodes.reset_repeat_secs", "must be > 0 when set"));
    }

    // Gateway
    if config.gateway.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.rpc_timeout_secs", "must be > 0"));
    }

    // Custody
    if config.custody.master_secret_env.trim().is_empty() {
        errors.push(ValidationError::new("custody.master_secret_env", "must not be empty"));
    }

    // Observability
    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    // Store
    let store = &config.store;
    if !store.database_url.starts_with("sqlite:") {
        errors.push(ValidationError::new("store.database_url", "must be a sqlite: url"));
    }
    if store.max_connections == 0 {
        errors.push(ValidationError::new("store.max_connections", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
