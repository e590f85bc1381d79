//! Docker container management for test databases.

pub mod lifecycle;
