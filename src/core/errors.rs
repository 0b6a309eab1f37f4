use thiserror::Error;

use crate::graph::model::{JobId, TaskId};

/// Unified error type for the job graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph cannot be brought into a consistent state: a splice could not
    /// find one of the nodes it has to connect, or the flow metadata contradicts
    /// the live topology.
    #[error("Structural fault in job {job} during {operation}: {message}")]
    Structural {
        job: JobId,
        operation: String,
        message: String,
    },

    /// The task is not in any of the sets the operation accepts
    #[error("Task {task_id} is not tracked for {operation}")]
    NotTracked { task_id: TaskId, operation: String },

    /// Name lookup failed
    #[error("Unknown task: {name}")]
    UnknownTask { name: String },

    /// Malformed job definition
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        task: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A bounded graph search ran out of budget
    #[error("Search from {origin} exceeded the limit of {limit} visited tasks")]
    SearchLimitExceeded { origin: TaskId, limit: usize },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl GraphError {
    /// Create a structural-integrity fault
    pub fn structural<O: Into<String>, M: Into<String>>(job: JobId, operation: O, message: M) -> Self {
        Self::Structural {
            job,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_tracked<O: Into<String>>(task_id: TaskId, operation: O) -> Self {
        Self::NotTracked {
            task_id,
            operation: operation.into(),
        }
    }

    pub fn unknown_task<S: Into<String>>(name: S) -> Self {
        Self::UnknownTask { name: name.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            task: None,
        }
    }

    /// Create a validation error pointing at one task
    pub fn validation_task<S: Into<String>, T: Into<String>>(message: S, task: T) -> Self {
        Self::Validation {
            message: message.into(),
            task: Some(task.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the owning job can keep scheduling after this error.
    ///
    /// Anything that touches graph integrity is fatal for the job.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Structural { .. } | Self::NotTracked { .. } | Self::SearchLimitExceeded { .. } => false,
            Self::UnknownTask { .. } => false,
            Self::Validation { .. } | Self::Configuration { .. } => false,
            Self::Serialization { .. } | Self::Io { .. } => true,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Structural { .. } => "structural",
            Self::NotTracked { .. } => "not_tracked",
            Self::UnknownTask { .. } => "unknown_task",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::SearchLimitExceeded { .. } => "search_limit",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GraphError>;

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}
