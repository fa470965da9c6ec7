//! Error types for sopgate

use thiserror::Error;

use crate::role::Level;

/// The main error type for sopgate operations.
///
/// Access decisions never produce one of these; denials are plain `false`.
/// Errors come from the persistence collaborator, from mutation guards, and
/// from configuration loading.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("a permission change is already in flight for {0}")]
    Busy(String),

    #[error("no department selected")]
    NoDepartment,

    #[error("{actor} lacks {feature}")]
    NotPermitted { actor: String, feature: &'static str },

    #[error("You cannot modify your own permissions")]
    SelfModification,

    #[error("role {requested} is outside the allowed range")]
    RoleNotAllowed { requested: Level },

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for sopgate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Convert any storage error to GateError
pub fn err<E: std::error::Error>(e: E) -> GateError {
    GateError::Storage(e.to_string())
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for GateError {
    fn from(e: config::ConfigError) -> Self {
        GateError::Config(e.to_string())
    }
}
