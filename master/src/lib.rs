pub mod clock;
pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod executor;
pub mod registry;
pub mod restoration;
pub mod restoration_tracker;
pub mod scheduler;
pub mod services;
pub mod snapshot;
pub mod web;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigManager};
pub use database::Database;
pub use errors::{ErrorKind, MasterError};
pub use executor::{HttpTabletExecutor, MemoryTabletExecutor, RetryPolicy, TabletExecutor};
pub use registry::SnapshotScheduleRegistry;
pub use restoration::{RestorationOrchestrator, RestorationStore};
pub use restoration_tracker::RestorationTracker;
pub use scheduler::{Housekeeper, SnapshotScheduler};
pub use services::AdminService;
