// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Output '{path}' would be produced by both {first} and {second}")]
    DuplicateProducer {
        path: String,
        first: String,
        second: String,
    },

    #[error("Cycle detected in task graph: {}", .0.join(" -> "))]
    DagCycle(Vec<String>),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Task '{0}' is required but matched no inputs")]
    RequiredInputsMissing(String),

    #[error("Unresolved parameter '{name}' in {context}")]
    UnresolvedParameter { name: String, context: String },

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    /// Structural errors that abort a run before anything is scheduled.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PipedagError::ConfigError(_)
                | PipedagError::DuplicateTask(_)
                | PipedagError::UnknownTask(_)
                | PipedagError::DuplicateProducer { .. }
                | PipedagError::DagCycle(_)
                | PipedagError::InvalidPattern { .. }
                | PipedagError::RequiredInputsMissing(_)
                | PipedagError::TomlError(_)
        )
    }

    /// Process exit code for this error (`1` is reserved for failed tasks).
    pub fn exit_code(&self) -> i32 {
        if self.is_configuration_error() {
            EXIT_CONFIG_ERROR
        } else {
            EXIT_FATAL
        }
    }
}

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_TASKS_FAILED: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;
pub const EXIT_FATAL: i32 = 3;

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
