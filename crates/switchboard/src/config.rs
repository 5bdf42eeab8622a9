//! Environment-driven configuration for the core.

use std::path::PathBuf;
use std::time::Duration;

pub const AGENT_TIMEOUT_ENV: &str = "AGENT_TIMEOUT_MS";
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 120_000;

/// The agent-call deadline. Missing, non-numeric, and non-positive values
/// all fall back to the default.
pub fn agent_timeout() -> Duration {
    agent_timeout_from(std::env::var(AGENT_TIMEOUT_ENV).ok().as_deref())
}

fn agent_timeout_from(raw: Option<&str>) -> Duration {
    let millis = raw
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|millis| *millis > 0)
        .map(|millis| millis as u64)
        .unwrap_or(DEFAULT_AGENT_TIMEOUT_MS);

    Duration::from_millis(millis)
}

/// Directory for the on-disk database, created on demand by the caller.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switchboard")
}

pub fn default_db_path() -> PathBuf {
    data_dir().join(crate::storage::DB_NAME)
}
