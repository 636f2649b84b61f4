//! This module provides reusable test utilities:
//! - A fully wired in-process cluster on the in-memory tablet executor
//! - A mock tablet-server agent
//! - Test configuration builders
//! - Common test data

#![allow(unused_imports)]

pub mod mock_agent;
pub mod test_cluster;
pub mod test_config;
pub mod test_data;

// Re-export commonly used items
pub use mock_agent::MockAgentServer;
pub use test_cluster::TestCluster;
pub use test_config::{TestConfig, TestConfigBuilder};
pub use test_data::*;
