//! Error types for HomeSense Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Session expired")]
    SessionExpired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource access denied: {0}")]
    ResourceAccessDenied(String),

    #[error("Role {target} is not assignable by {actor}")]
    RoleNotAssignable { actor: String, target: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
