//! Logging and tracing configuration
//!
//! The interactive view owns the terminal, so it only logs when a log file
//! is configured. Headless runs log to stderr next to the package output.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "TESTSTREAM_LOG";
const DEFAULT_FILTER: &str = "teststream=info,warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to a file for the interactive view; no-op without a path
pub fn init_tui(log_file: Option<&Path>) {
    let Some(path) = log_file else {
        return;
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {}", e);
            return;
        }
    }

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .try_init();
        }
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
        }
    }
}

/// Log to stderr for headless runs
pub fn init_headless() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init();
}
