//! HTTP request handlers for the snapshot master API.
//!
//! This module is organized by domain:
//! - `common` - Response envelope and error mapping
//! - `schedules` - Schedule CRUD, snapshot history and restore requests
//! - `restorations` - Restoration listing and lookup

pub mod common;
pub mod restorations;
pub mod schedules;

pub use restorations::*;
pub use schedules::*;
