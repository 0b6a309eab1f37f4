// Core infrastructure modules
pub mod core;

// Per-job dependency graph and its control-flow rewrites
pub mod graph;

// Re-exports for convenience
pub use crate::core::config::{GraphConfig, TelemetryConfig};
pub use crate::core::errors::{GraphError, Result};
pub use crate::core::telemetry::init_tracing;
pub use graph::*;
