use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

/// Maps a `--log-level` value to an `EnvFilter` directive.
pub fn level_directive(level: &str) -> anyhow::Result<&'static str> {
    Ok(match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" | "CRITICAL" => "error",
        other => anyhow::bail!("unknown log level {other:?}"),
    })
}

/// Installs the global subscriber: stderr always, plus an append-mode file
/// when `log_file` is set. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let directive = level_directive(level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(f)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
