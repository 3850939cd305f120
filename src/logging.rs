use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Overrides `log.level` when set, using `EnvFilter` directive syntax.
pub const LOG_ENV: &str = "BLOG_TUI_LOG";

/// Installs the global subscriber. Output goes to the configured file since
/// the terminal belongs to the UI; with no file configured, events are
/// dropped.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let Some(path) = cfg.file.as_ref() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(cfg))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("logging: install subscriber: {err}"))?;

    tracing::info!(version = crate::VERSION, file = %path.display(), "logging: started");
    Ok(())
}

fn env_filter(cfg: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
