pub mod config;
pub mod pipeline;

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable naming a file to append logs to instead of stderr.
pub const LOG_FILE_VAR: &str = "MEDASSIST_LOG_FILE";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()))
}

/// Install the global tracing subscriber. Call once, at startup.
pub fn init_tracing() {
    let log_file = std::env::var(LOG_FILE_VAR).ok().filter(|p| !p.trim().is_empty());

    match log_file.map(|path| (OpenOptions::new().create(true).append(true).open(&path), path)) {
        Some((Ok(file), _)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Some((Err(e), path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %path, error = %e, "Cannot open log file, logging to stderr");
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
