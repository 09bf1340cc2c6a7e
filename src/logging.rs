//! Tracing subscriber setup for embedding applications.

use crate::error::{QuireError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber filtered by `level`
/// (an `EnvFilter` directive such as `"info"` or `"quire=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|_| QuireError::Invalid("invalid log level"))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| QuireError::Invalid("logging already initialized"))
}
