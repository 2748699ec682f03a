//! Common utilities for the ferry exchange layer.
//!
//! This crate holds the error taxonomy, execution configuration and logging
//! setup shared by the core runners.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ExchangeConfig, LoggingConfig};
pub use error::{EOF_MESSAGE, ErrorCategory, FerryError, Result, TransportContext};
pub use logging::init_tracing;
