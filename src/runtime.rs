//! Runtime glue that wires configuration, telemetry, fatal error capture,
//! progress aggregation, and the collector/runner orchestration.

pub mod collector;
pub mod config;
pub mod fatal;
pub mod progress;
pub mod runner;
pub mod telemetry;
