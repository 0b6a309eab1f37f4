// Core infrastructure shared by the graph modules

pub mod config;
pub mod errors;
pub mod telemetry;

pub use config::{GraphConfig, TelemetryConfig};
pub use errors::{GraphError, Result};
pub use telemetry::init_tracing;
