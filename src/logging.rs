//! Debug log setup.
//!
//! Stdout carries the generated command, so all diagnostics go to a file in the data directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// File name of the debug log inside the data directory.
pub const DEBUG_LOG_FILE: &str = "nl2sh_debug.log";

const DEFAULT_FILTER: &str = "debug";

/// Installs the global subscriber writing to `<dir>/nl2sh_debug.log`.
///
/// `RUST_LOG` overrides the default `debug` filter.  The returned guard flushes the log when
/// dropped and must be held for the life of the process.
pub fn init_logging(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir).map_err(|err| {
        Error::io(
            format!("cannot create log directory {}", dir.display()),
            err,
        )
    })?;
    let appender = tracing_appender::rolling::never(dir, DEBUG_LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| Error::unknown(format!("cannot install log subscriber: {err}")))?;

    tracing::info!(
        target: "nl2sh::init",
        path = %dir.join(DEBUG_LOG_FILE).display(),
        "logging initialized"
    );
    Ok(guard)
}
