//! Logging setup.
//!
//! A run logs to stderr and to `<dir>/YYYY-MM-DD.log` (local date, append).
//! The subscriber is returned as a [`Dispatch`] for the caller to scope
//! explicitly; nothing is installed as the global default.

use chrono::{Local, NaiveDate};
use fundsnap_common::{Error, Result};
use fundsnap_config::LoggingConfig;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log file for `date` under `dir`.
pub fn daily_log_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.log", date.format("%Y-%m-%d")))
}

/// Filter from `RUST_LOG` when set, else the configured level.
pub fn env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directives = rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(level);
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("invalid log filter '{directives}': {e}")))
}

/// Console plus daily-file dispatch; returns the log file path.
pub fn build_dispatch(config: &LoggingConfig) -> Result<(Dispatch, PathBuf)> {
    fs::create_dir_all(&config.dir)?;
    let path = daily_log_path(&config.dir, Local::now().date_naive());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(&config.level, rust_log.as_deref())?;
    let dispatch = dispatch_with_writers(filter, config.json, io::stderr, Mutex::new(file));
    Ok((dispatch, path))
}

/// Assemble the two fmt layers over arbitrary writers.
pub fn dispatch_with_writers<C, F>(filter: EnvFilter, json: bool, console: C, file: F) -> Dispatch
where
    C: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    F: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        Dispatch::new(
            registry
                .with(fmt::layer().json().with_writer(console))
                .with(fmt::layer().json().with_ansi(false).with_writer(file)),
        )
    } else {
        Dispatch::new(
            registry
                .with(fmt::layer().with_target(false).with_writer(console))
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(file),
                ),
        )
    }
}
