//! File logging. The attached terminal is in raw mode, so nothing is ever
//! written to stderr once a session is running.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "RESCREEN_LOG";
pub const LOG_FILE: &str = "rescreen.log";

/// Directory holding the log file: the parent of the registry directory.
pub fn state_dir(registry_dir: &Path) -> PathBuf {
    registry_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| registry_dir.to_path_buf())
}

/// Install the global subscriber writing to `<dir>/rescreen.log`.
///
/// The returned guard flushes the background writer when dropped and must be
/// held for as long as the process logs.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(dir)
        .with_context(|| format!("opening log file in {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    build_subscriber(writer, env_filter())
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn build_subscriber<W>(writer: W, filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry().with(fmt_layer).with(filter)
}
