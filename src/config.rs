use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_LOG: &str = "RESULTSD_LOG";
pub const ENV_WORKSPACE: &str = "RESULTSD_WORKSPACE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "RESULTSD_BUSY_TIMEOUT_MS";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Process-level settings read once at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: Option<String>,
    pub workspace: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let busy_timeout_ms = match non_empty(ENV_BUSY_TIMEOUT_MS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{ENV_BUSY_TIMEOUT_MS} must be milliseconds, got {raw:?}"))?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            log_filter: non_empty(ENV_LOG),
            workspace: non_empty(ENV_WORKSPACE).map(PathBuf::from),
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}
