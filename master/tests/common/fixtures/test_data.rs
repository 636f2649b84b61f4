//! Common test data

use std::time::Duration;

pub const TEST_NAMESPACE: &str = "ks";
pub const TEST_TABLE: &str = "test_table";
pub const TEST_TABLE_QUALIFIED: &str = "ks.test_table";
pub const OTHER_NAMESPACE: &str = "other";
pub const OTHER_TABLE_QUALIFIED: &str = "other.events";
pub const TABLETS_PER_TABLE: usize = 3;

/// Six seconds, the shortest interval the admin surface is usually driven with
pub const INTERVAL_SECS: u64 = 6;
pub const RETENTION_SECS: u64 = 600;

/// Upper bound for background work to settle in tests
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub const TEST_API_KEY: &str = "test-api-key";
