use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const DATA_DIR_ENV: &str = "WIKIFORUM_DATA_DIR";
pub const LOG_FILTER_ENV: &str = "WIKIFORUM_LOG";

/// Returns the wikiforum data directory, creating it if it does not exist.
/// `WIKIFORUM_DATA_DIR` wins over the platform default.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = dirs_fallback();
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

fn dirs_fallback() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(data) = std::env::var_os("LOCALAPPDATA") {
        return PathBuf::from(data).join("wikiforum");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("wikiforum");
    }
    PathBuf::from(".wikiforum")
}

/// Diagnostics go to stderr so stdout stays parseable.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Logs an error message to error.log in the data directory with a timestamp.
pub fn log_error(message: &str) {
    if let Err(e) = try_log_error(message) {
        eprintln!("warning: failed to write to error.log: {}", e);
    }
}

fn try_log_error(message: &str) -> Result<(), std::io::Error> {
    let log_path = data_dir()?.join("error.log");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    writeln!(file, "[{}] {}", timestamp, message)?;
    Ok(())
}
