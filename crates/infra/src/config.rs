//! Worker configuration from the process environment.
//!
//! | variable | default |
//! |---|---|
//! | `DATABASE_URL` | unset: in-memory account store |
//! | `TXM_WORKER_NAME` | `txmachine-worker` |
//! | `TXM_POLL_INTERVAL_MS` | `100` |
//! | `TXM_MAX_ATTEMPTS` | `5` |

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_WORKER_NAME: &str = "txmachine-worker";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Name used in log lines.
    pub name: String,
    /// Sleep between claims when the queue has nothing ready.
    pub poll_interval: Duration,
    /// Retry budget for jobs enqueued by this process.
    pub max_attempts: u32,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKER_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            database_url: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let name = lookup("TXM_WORKER_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(defaults.name);
        let poll_interval = parse_or(&lookup, "TXM_POLL_INTERVAL_MS", 100u64)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_attempts =
            parse_or(&lookup, "TXM_MAX_ATTEMPTS", defaults.max_attempts).unwrap_or(defaults.max_attempts);
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Self {
            name,
            poll_interval,
            max_attempts,
            database_url,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parse_or<T: FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Option<T> {
    let raw = lookup(var)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = %raw, default = %default, "invalid value, using default");
            None
        }
    }
}
