//! Error types for Mailflow.

use std::time::Duration;

use uuid::Uuid;

use crate::capability::Capability;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Remote capability call errors.
///
/// `Timeout` and `Remote` are transient (the engine retries them with
/// backoff); `Malformed` and `Rejected` are logical failures and are not
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{capability} timed out after {timeout:?}")]
    Timeout {
        capability: Capability,
        timeout: Duration,
    },

    #[error("{capability} request failed: {reason}")]
    Remote {
        capability: Capability,
        reason: String,
    },

    #[error("{capability} returned a malformed response: {reason}")]
    Malformed {
        capability: Capability,
        reason: String,
    },

    #[error("{capability} rejected the request: {message}")]
    Rejected {
        capability: Capability,
        message: String,
    },
}

impl CapabilityError {
    /// Whether the engine's retry policy applies to this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Remote { .. })
    }

    /// The capability that produced this error.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Timeout { capability, .. }
            | Self::Remote { capability, .. }
            | Self::Malformed { capability, .. }
            | Self::Rejected { capability, .. } => *capability,
        }
    }
}

/// Approval gate errors — surfaced to the caller, never mutate state.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Suggestion {id} not found")]
    NotFound { id: Uuid },

    #[error("Suggestion {id} already decided ({status})")]
    AlreadyDecided { id: Uuid, status: String },

    #[error("Suggestion {id} has expired and can no longer be approved")]
    Expired { id: Uuid },

    #[error("Suggestion {id} has no draft for tone '{tone}'")]
    MissingTone { id: Uuid, tone: String },
}

/// Caller-supplied parameter errors — rejected immediately, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown task kind: '{0}'")]
    UnknownTask(String),

    #[error("Task '{task}' cannot be triggered here: {reason}")]
    UnsupportedTask {
        task: String,
        reason: &'static str,
    },

    #[error("Unknown tone: '{0}' (expected formal, casual, or brief)")]
    UnknownTone(String),

    #[error("Invalid date '{value}': {message}")]
    InvalidDate { value: String, message: String },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
