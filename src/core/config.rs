use crate::core::errors::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

/// Tuning for a job graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of tasks a single end/join search may visit
    pub search_limit: usize,
    /// Report lifecycle precondition violations as errors instead of
    /// logging them and leaving the sets untouched
    pub strict_preconditions: bool,
    /// Log output settings
    pub telemetry: TelemetryConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            search_limit: 100_000,
            strict_preconditions: false,
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Log output settings used by [`crate::core::telemetry::init_tracing`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Colored output
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    pub fn max_level(&self) -> Result<Level> {
        Level::from_str(&self.level).map_err(|_| {
            GraphError::configuration_field(
                format!("unknown log level '{}'", self.level),
                "telemetry.level",
            )
        })
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.search_limit == 0 {
            return Err(GraphError::configuration_field(
                "search_limit must be greater than 0",
                "search_limit",
            ));
        }
        self.telemetry.max_level()?;
        Ok(())
    }

    /// Small search budget and strict precondition checks, for tests
    pub fn conservative() -> Self {
        Self {
            search_limit: 1_000,
            strict_preconditions: true,
            telemetry: TelemetryConfig {
                level: "debug".to_string(),
                ansi: false,
            },
        }
    }

    /// Large search budget for jobs with many replicated blocks
    pub fn permissive() -> Self {
        Self {
            search_limit: 10_000_000,
            strict_preconditions: false,
            telemetry: TelemetryConfig {
                level: "warn".to_string(),
                ansi: true,
            },
        }
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: GraphConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&content)
    }
}
