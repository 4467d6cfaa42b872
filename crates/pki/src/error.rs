//! PKI errors

use thiserror::Error;

/// Errors that can occur while generating or issuing certificates
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate creation or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// PEM material could not be parsed
    #[error("certificate parsing error: {0}")]
    Parse(String),

    /// The request cannot be expressed as a certificate
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),

    /// Kubeconfig serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;
