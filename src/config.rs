//! Runtime configuration (ambient addition; see SPEC_FULL.md §2).
//!
//! Centralizes what the teacher's `main.rs` reads ad hoc from
//! `std::env::var` (`PHOENIX_DB_PATH`, `PHOENIX_PORT`, …) into one
//! struct resolved exactly once in `main`.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_AGENT_BIN: &str = "claude";
const DEFAULT_MODE_SWITCH_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub max_concurrent: usize,
    pub agent_bin: String,
    pub mode_switch_delay: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            data_dir: env_path("AGENT_SUPERVISOR_DATA_DIR").unwrap_or_else(default_data_dir),
            port: env_parsed("AGENT_SUPERVISOR_PORT").unwrap_or(DEFAULT_PORT),
            max_concurrent: env_parsed("AGENT_SUPERVISOR_MAX_CONCURRENT").unwrap_or(DEFAULT_MAX_CONCURRENT),
            agent_bin: std::env::var("AGENT_SUPERVISOR_AGENT_BIN").unwrap_or_else(|_| DEFAULT_AGENT_BIN.to_string()),
            mode_switch_delay: env_parsed::<u64>("AGENT_SUPERVISOR_MODE_SWITCH_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_MODE_SWITCH_DELAY_MS)),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-supervisor")
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        // SAFETY for the purposes of this single-threaded test: scoped
        // to a key this crate owns and restored immediately after.
        std::env::remove_var("AGENT_SUPERVISOR_PORT");
        let config = Config::from_env();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn reads_overrides() {
        std::env::set_var("AGENT_SUPERVISOR_MAX_CONCURRENT", "7");
        let config = Config::from_env();
        assert_eq!(config.max_concurrent, 7);
        std::env::remove_var("AGENT_SUPERVISOR_MAX_CONCURRENT");
    }
}
