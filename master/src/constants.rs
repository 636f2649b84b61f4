//! Central repository for timeouts, intervals, and limits
//!
//! Constants are grouped by the component that consumes them. Values that
//! operators may want to tune are also exposed through `config/main.toml`,
//! in which case the constant is only the default.

use std::time::Duration;

/// HTTP client timeouts for tablet-server agents
pub mod http {
    use super::Duration;

    /// Default timeout for a single request to an agent
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default interval between job status polls
    pub const JOB_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Consecutive failed polls before a job is treated as unavailable
    pub const MAX_POLL_FAILURES: u32 = 5;
}

/// Default per-tablet retry policy
pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const INITIAL_BACKOFF_MS: u64 = 100;
    pub const MAX_BACKOFF_MS: u64 = 5_000;
    pub const MULTIPLIER: f64 = 2.0;
}

/// Snapshot scheduler timing
pub mod scheduler {
    use super::Duration;

    /// A tick counts as due this much before the full interval has elapsed,
    /// capped at one twentieth of the interval
    pub const MAX_JITTER_TOLERANCE: Duration = Duration::from_secs(1);

    /// Divisor applied to the interval when computing the tolerance
    pub const JITTER_DIVISOR: u32 = 20;
}

/// Restoration polling helpers
pub mod restoration {
    use super::Duration;

    /// How often `wait_for_terminal` re-reads the job
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
}

/// Housekeeping of finished restorations
pub mod housekeeping {
    /// Hourly, on the hour
    pub const DEFAULT_SCHEDULE: &str = "0 0 * * * *";

    /// Terminal restorations older than this are purged
    pub const RESTORATION_RETENTION_HOURS: i64 = 24 * 7;
}

/// Web server configuration
pub mod web {
    /// Default configuration directory
    pub const CONFIG_DIR: &str = "config";
}
