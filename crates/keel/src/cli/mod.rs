//! Command implementations for the `keel` binary.

pub mod config;
pub mod run;
