// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cfg::config::{LogOutput, LoggingConfig};

/// Installs the global `tracing` subscriber per the config's logging
/// section. The returned guard must be kept alive for the process's
/// lifetime — dropping it stops the background flush thread for the
/// non-blocking writer.
pub fn init_logger(cfg: &LoggingConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse logging.level")?;

    let (writer, guard) = match cfg.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File => {
            let path = cfg
                .file_path
                .as_ref()
                .context("logging.file_path is required when logging.output = file")?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("logging.file_path must name a file")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            tracing_appender::non_blocking(appender)
        },
    };

    let ansi = matches!(cfg.output, LogOutput::Stdout | LogOutput::Stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_ansi(ansi))
        .try_init()
        .context("failed to install global tracing subscriber")?;

    Ok(guard)
}
