//! Hypervisor client errors

use thiserror::Error;

/// Errors that can occur when talking to a hypervisor agent
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent returned an error
    #[error("Hypervisor API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or missing token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found (e.g. an image the registry does not have)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (rejected by the agent before acting)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
