//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::Result;

/// Install a global `fmt` subscriber. Later calls are no-ops, so tests may call it freely.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let level = config.level()?;
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target);
    let _ = if config.test_writer {
        builder.with_test_writer().try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}
