//! Configuration for exchange execution.

use crate::error::{FerryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by every runner of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Capacity of the in-process queue used when a node sends to itself
    pub short_circuit_capacity: usize,
    /// Capacity of the channels a union creates for each sub-runner
    pub channel_capacity: usize,
    /// Maximum number of rows per batch produced by a sorted gather
    pub merge_batch_size: usize,
    /// Largest envelope frame accepted from a peer, in bytes
    pub max_frame_length: usize,
    /// Replicas per node on the partitioning hash ring
    pub virtual_nodes: usize,
    /// Upper bound on end-of-stream delivery and close during shutdown
    pub shutdown_timeout_ms: u64,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level, one of trace/debug/info/warn/error
    pub level: String,
    /// Include the event target in formatted output
    pub with_target: bool,
    /// Write through the test harness so output is captured per test
    pub test_writer: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            short_circuit_capacity: 1000,
            channel_capacity: 16,
            merge_batch_size: 1024,
            max_frame_length: 64 * 1024 * 1024, // 64MB
            virtual_nodes: 160,
            shutdown_timeout_ms: 5000, // 5 seconds
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            test_writer: false,
        }
    }
}

impl ExchangeConfig {
    /// Parse and validate a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ExchangeConfig = serde_json::from_str(json)
            .map_err(|e| FerryError::config_error_with_source("malformed exchange config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break an exchange.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("short_circuit_capacity", self.short_circuit_capacity),
            ("channel_capacity", self.channel_capacity),
            ("merge_batch_size", self.merge_batch_size),
            ("max_frame_length", self.max_frame_length),
            ("virtual_nodes", self.virtual_nodes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FerryError::config_error(format!("{name} must be positive")));
            }
        }
        self.logging.level()?;
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_short_circuit_capacity(mut self, capacity: usize) -> Self {
        self.short_circuit_capacity = capacity;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_merge_batch_size(mut self, rows: usize) -> Self {
        self.merge_batch_size = rows;
        self
    }

    pub fn with_max_frame_length(mut self, bytes: usize) -> Self {
        self.max_frame_length = bytes;
        self
    }

    pub fn with_virtual_nodes(mut self, replicas: usize) -> Self {
        self.virtual_nodes = replicas;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

impl LoggingConfig {
    /// The configured maximum level.
    pub fn level(&self) -> Result<tracing::Level> {
        self.level
            .parse::<tracing::Level>()
            .map_err(|e| FerryError::config_error_with_source(format!("bad log level {}", self.level), e))
    }
}
