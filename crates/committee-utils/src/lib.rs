//! Shared utilities for committee-rs
//!
//! Logging setup and application configuration used by the binaries.

pub mod config;
pub mod logging;

pub use config::Config;
pub use logging::{LogFormat, init_tracing, init_tracing_with, try_init_tracing};
