// Shared by every integration test binary; each uses a different subset
#![allow(dead_code)]

pub mod fixtures;
