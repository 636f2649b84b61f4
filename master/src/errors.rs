//! Custom error types for the snapshot master
//!
//! Every domain failure maps to a stable [`ErrorKind`] so the admin layer can
//! surface a machine-parsable kind next to the human-readable message.

use std::fmt;

/// Result alias used by the registry, scheduler and orchestrator
pub type Result<T> = std::result::Result<T, MasterError>;

/// Stable, machine-parsable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    IllegalState,
    Unavailable,
    Failed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::IllegalState => "ILLEGAL_STATE",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Failed => "FAILED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the snapshot master
#[derive(Debug)]
pub enum MasterError {
    /// Snapshot schedule registry errors
    Schedule(ScheduleError),

    /// Restoration orchestration errors
    Restoration(RestorationError),

    /// Tablet operation errors
    Tablet(TabletError),

    /// Configuration-related errors
    Config(ConfigError),

    /// Database operation errors
    Database(DatabaseError),

    /// Other errors with context
    Other(String),
}

/// Schedule registry error variants
#[derive(Debug)]
pub enum ScheduleError {
    /// Interval was zero, negative or not a number
    InvalidInterval { reason: String },

    /// Retention shorter than the interval
    InvalidRetention { retention_ms: u128, interval_ms: u128 },

    /// Schedule created without any target object
    NoTargets,

    /// Malformed target object identifier
    InvalidTarget { target: String },

    /// Unknown schedule id
    NotFound { schedule_id: String },

    /// Schedule is referenced by a running restoration
    ActiveRestoration {
        schedule_id: String,
        restoration_id: String,
    },

    /// Unknown snapshot id within a schedule
    SnapshotNotFound {
        schedule_id: String,
        snapshot_id: String,
    },

    /// Snapshot chain invariant violated
    ChainBroken { schedule_id: String, reason: String },

    /// Snapshot record already reached a terminal state
    SnapshotTerminal {
        snapshot_id: String,
        state: String,
    },
}

/// Restoration error variants
#[derive(Debug)]
pub enum RestorationError {
    /// Unknown restoration id
    NotFound { restoration_id: String },

    /// Target precedes every retained complete snapshot
    TimestampTooOld {
        schedule_id: String,
        target: String,
        earliest: Option<String>,
    },

    /// Target lies in the future
    TimestampInFuture { target: String, now: String },

    /// Another restoration of the same schedule is still running
    AlreadyRestoring {
        schedule_id: String,
        restoration_id: String,
    },

    /// Attempt to move a restoration out of a terminal state
    TerminalState {
        restoration_id: String,
        state: String,
    },
}

/// Tablet operation error variants
#[derive(Debug)]
pub enum TabletError {
    /// Transient failure, retried locally
    Unavailable { tablet_id: String, reason: String },

    /// Retry budget exhausted
    RetriesExhausted {
        tablet_id: String,
        operation: String,
        attempts: u32,
        reason: String,
    },

    /// Tablet refused the operation; retrying cannot help
    Rejected { tablet_id: String, reason: String },

    /// Target object has no tablets known to the executor
    UnknownTarget { target: String },
}

/// Configuration error variants
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to load configuration file
    LoadFailed { path: String, reason: String },

    /// Invalid configuration value
    InvalidValue { field: String, reason: String },

    /// Configuration parsing error
    ParseError { reason: String },
}

/// Database error variants
#[derive(Debug)]
pub enum DatabaseError {
    /// Connection failed
    ConnectionFailed { reason: String },

    /// Query execution failed
    QueryFailed { query: String, reason: String },

    /// Stored row could not be decoded
    CorruptRow { table: String, reason: String },
}

impl MasterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MasterError::Schedule(e) => match e {
                ScheduleError::InvalidInterval { .. }
                | ScheduleError::InvalidRetention { .. }
                | ScheduleError::NoTargets
                | ScheduleError::InvalidTarget { .. } => ErrorKind::InvalidArgument,
                ScheduleError::NotFound { .. } | ScheduleError::SnapshotNotFound { .. } => {
                    ErrorKind::NotFound
                }
                ScheduleError::ActiveRestoration { .. } => ErrorKind::Conflict,
                ScheduleError::ChainBroken { .. } | ScheduleError::SnapshotTerminal { .. } => {
                    ErrorKind::IllegalState
                }
            },
            MasterError::Restoration(e) => match e {
                RestorationError::NotFound { .. } => ErrorKind::NotFound,
                RestorationError::TimestampTooOld { .. }
                | RestorationError::TimestampInFuture { .. } => ErrorKind::InvalidArgument,
                RestorationError::AlreadyRestoring { .. } => ErrorKind::Conflict,
                RestorationError::TerminalState { .. } => ErrorKind::IllegalState,
            },
            MasterError::Tablet(e) => match e {
                TabletError::Unavailable { .. } => ErrorKind::Unavailable,
                TabletError::RetriesExhausted { .. } | TabletError::Rejected { .. } => {
                    ErrorKind::Failed
                }
                TabletError::UnknownTarget { .. } => ErrorKind::InvalidArgument,
            },
            MasterError::Config(_) | MasterError::Database(_) | MasterError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

// Implement Display for all error types
impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterError::Schedule(e) => write!(f, "Schedule error: {}", e),
            MasterError::Restoration(e) => write!(f, "Restoration error: {}", e),
            MasterError::Tablet(e) => write!(f, "Tablet error: {}", e),
            MasterError::Config(e) => write!(f, "Configuration error: {}", e),
            MasterError::Database(e) => write!(f, "Database error: {}", e),
            MasterError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::InvalidInterval { reason } => {
                write!(f, "Invalid snapshot interval: {}", reason)
            }
            ScheduleError::InvalidRetention {
                retention_ms,
                interval_ms,
            } => write!(
                f,
                "Retention ({}ms) must not be shorter than the interval ({}ms)",
                retention_ms, interval_ms
            ),
            ScheduleError::NoTargets => write!(f, "At least one target is required"),
            ScheduleError::InvalidTarget { target } => {
                write!(f, "Invalid target '{}'", target)
            }
            ScheduleError::NotFound { schedule_id } => {
                write!(f, "Schedule '{}' not found", schedule_id)
            }
            ScheduleError::ActiveRestoration {
                schedule_id,
                restoration_id,
            } => write!(
                f,
                "Schedule '{}' is being restored by '{}'",
                schedule_id, restoration_id
            ),
            ScheduleError::SnapshotNotFound {
                schedule_id,
                snapshot_id,
            } => write!(
                f,
                "Snapshot '{}' not found in schedule '{}'",
                snapshot_id, schedule_id
            ),
            ScheduleError::ChainBroken {
                schedule_id,
                reason,
            } => write!(
                f,
                "Snapshot chain of schedule '{}' is broken: {}",
                schedule_id, reason
            ),
            ScheduleError::SnapshotTerminal { snapshot_id, state } => write!(
                f,
                "Snapshot '{}' is already {} and cannot change state",
                snapshot_id, state
            ),
        }
    }
}

impl fmt::Display for RestorationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestorationError::NotFound { restoration_id } => {
                write!(f, "Restoration '{}' not found", restoration_id)
            }
            RestorationError::TimestampTooOld {
                schedule_id,
                target,
                earliest,
            } => match earliest {
                Some(earliest) => write!(
                    f,
                    "Timestamp {} is too old for schedule '{}': earliest retained snapshot is {}",
                    target, schedule_id, earliest
                ),
                None => write!(
                    f,
                    "Timestamp {} is not yet retained: schedule '{}' has no complete snapshot",
                    target, schedule_id
                ),
            },
            RestorationError::TimestampInFuture { target, now } => write!(
                f,
                "Timestamp {} is in the future (now is {})",
                target, now
            ),
            RestorationError::AlreadyRestoring {
                schedule_id,
                restoration_id,
            } => write!(
                f,
                "Schedule '{}' is already being restored by '{}'",
                schedule_id, restoration_id
            ),
            RestorationError::TerminalState {
                restoration_id,
                state,
            } => write!(
                f,
                "Restoration '{}' is already {} and cannot change state",
                restoration_id, state
            ),
        }
    }
}

impl fmt::Display for TabletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabletError::Unavailable { tablet_id, reason } => {
                write!(f, "Tablet {} unavailable: {}", tablet_id, reason)
            }
            TabletError::RetriesExhausted {
                tablet_id,
                operation,
                attempts,
                reason,
            } => write!(
                f,
                "Operation '{}' on tablet {} failed after {} attempts: {}",
                operation, tablet_id, attempts, reason
            ),
            TabletError::Rejected { tablet_id, reason } => {
                write!(f, "Tablet {} rejected the operation: {}", tablet_id, reason)
            }
            TabletError::UnknownTarget { target } => {
                write!(f, "No tablets found for target '{}'", target)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path, reason)
            }
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            ConfigError::ParseError { reason } => {
                write!(f, "Failed to parse config: {}", reason)
            }
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::ConnectionFailed { reason } => {
                write!(f, "Database connection failed: {}", reason)
            }
            DatabaseError::QueryFailed { query, reason } => {
                write!(f, "Query '{}' failed: {}", query, reason)
            }
            DatabaseError::CorruptRow { table, reason } => {
                write!(f, "Corrupt row in '{}': {}", table, reason)
            }
        }
    }
}

// Implement std::error::Error
impl std::error::Error for MasterError {}
impl std::error::Error for ScheduleError {}
impl std::error::Error for RestorationError {}
impl std::error::Error for TabletError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for DatabaseError {}

// Infrastructure layers speak anyhow; wrap at the domain boundary
impl From<anyhow::Error> for MasterError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<MasterError>() {
            Ok(master) => master,
            Err(other) => MasterError::Database(DatabaseError::QueryFailed {
                query: "storage".to_string(),
                reason: format!("{:#}", other),
            }),
        }
    }
}

impl From<ScheduleError> for MasterError {
    fn from(err: ScheduleError) -> Self {
        MasterError::Schedule(err)
    }
}

impl From<RestorationError> for MasterError {
    fn from(err: RestorationError) -> Self {
        MasterError::Restoration(err)
    }
}

impl From<TabletError> for MasterError {
    fn from(err: TabletError) -> Self {
        MasterError::Tablet(err)
    }
}

impl From<ConfigError> for MasterError {
    fn from(err: ConfigError) -> Self {
        MasterError::Config(err)
    }
}

impl From<DatabaseError> for MasterError {
    fn from(err: DatabaseError) -> Self {
        MasterError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        let not_found: MasterError = ScheduleError::NotFound {
            schedule_id: "s1".to_string(),
        }
        .into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: MasterError = RestorationError::AlreadyRestoring {
            schedule_id: "s1".to_string(),
            restoration_id: "r1".to_string(),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let transient: MasterError = TabletError::Unavailable {
            tablet_id: "t1".to_string(),
            reason: "leader moved".to_string(),
        }
        .into();
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_domain_error() {
        let original: MasterError = ScheduleError::NoTargets.into();
        let wrapped = anyhow::Error::new(original);
        let back = MasterError::from(wrapped);
        assert_eq!(back.kind(), ErrorKind::InvalidArgument);
    }
}
