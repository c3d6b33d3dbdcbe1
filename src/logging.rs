use crate::types::{AttrError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `fmt` subscriber filtered by `level` (an `EnvFilter` directive
/// such as `"dense_attr=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|_| AttrError::Invalid("invalid log filter"))?,
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| AttrError::Invalid("logging already initialized"))
}
