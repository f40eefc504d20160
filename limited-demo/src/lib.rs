//! Shared plumbing for the demonstration binaries: tracing and metrics setup,
//! and shutdown signal handling.

pub mod shutdown;
pub mod telemetry;
