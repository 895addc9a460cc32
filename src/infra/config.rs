use std::fs;
use std::path::Path;

use tracing::debug;

use crate::domain::config::ForumConfig;
use crate::domain::error::DomainError;

pub const CONFIG_FILE: &str = "forum.toml";
pub const ALLOW_ANONYMOUS_ENV: &str = "WIKIFORUM_ALLOW_ANONYMOUS";

/// Reads `forum.toml` from the data directory. A missing file yields the defaults.
pub fn load(data_dir: &Path) -> Result<ForumConfig, DomainError> {
    let path = data_dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        let raw = fs::read_to_string(&path)?;
        parse(&raw).map_err(|e| DomainError::Config(format!("{}: {}", path.display(), e)))?
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        ForumConfig::default()
    };

    if let Ok(value) = std::env::var(ALLOW_ANONYMOUS_ENV) {
        config.allow_anonymous = parse_flag(&value).ok_or_else(|| {
            DomainError::Config(format!("{} は true か false を指定してください: {}", ALLOW_ANONYMOUS_ENV, value))
        })?;
    }
    Ok(config)
}

fn parse(raw: &str) -> Result<ForumConfig, String> {
    toml::from_str(raw).map_err(|e| e.to_string())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
