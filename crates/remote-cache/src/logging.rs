//! Tracing subscriber setup

use crate::cli::LogFormat;
use crate::settings::LogSettings;
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Filter used when `RUST_LOG` is not set. The SSH transport is kept at
/// warn, its debug output is per packet. The FTP library traces raw control
/// lines, `PASS` included, so it stays at info.
pub fn default_filter(level: &str) -> String {
    format!("{},russh=warn,suppaftp=info", level)
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(&settings.level)))
        .with_context(|| format!("Invalid log level '{}'", settings.level))?;

    let (writer, guard) = match &settings.file {
        Some(log_file) => {
            let dir = match log_file.parent() {
                Some(path) if !path.as_os_str().is_empty() => path,
                _ => Path::new("."),
            };
            let file_name = log_file
                .file_name()
                .ok_or_else(|| anyhow!("log file {} must include a file name", log_file.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(settings.file.is_none());

    let installed = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}
