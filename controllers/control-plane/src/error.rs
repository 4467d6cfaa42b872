//! Controller-specific error types.
//!
//! The reconciliation pipeline fails fast: the first failing step returns
//! its error and nothing is rolled back. Each step has its own variant so the
//! failure kind survives into `Component.status.errorKind`, and each variant
//! keeps the collaborator's error as its source.

use hypervisor_client::HypervisorError;
use kube::Error as KubeError;
use pki::PkiError;
use thiserror::Error;

/// Errors that can occur in the Control Plane Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A required container image could not be ensured on the hypervisor
    #[error("image unavailable: {0}")]
    ImageUnavailable(#[source] HypervisorError),

    /// A certificate authority could not produce a certificate/key pair
    #[error("certificate issuance failed: {0}")]
    CertificateIssuance(#[source] PkiError),

    /// A kubeconfig could not be built
    #[error("credential synthesis failed: {0}")]
    CredentialSynthesis(#[source] PkiError),

    /// The secret file map could not be fully written
    #[error("secret upload failed: {0}")]
    SecretUpload(#[source] HypervisorError),

    /// No host port could be reserved
    #[error("port allocation failed: {0}")]
    PortAllocation(String),

    /// A collaborator reported success but left required state absent
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The runtime rejected or failed to apply the pod specification
    #[error("pod placement failed: {0}")]
    PodPlacement(#[source] HypervisorError),

    /// Stored cluster material could not be loaded or generated
    #[error("cluster PKI error: {0}")]
    ClusterPki(#[source] PkiError),

    /// The hypervisor agent did not answer its health check
    #[error("hypervisor unreachable: {0}")]
    HypervisorUnreachable(#[source] HypervisorError),

    /// The cluster's cryptographic material has not been generated yet
    #[error("cluster not initialized: {0}")]
    ClusterNotInitialized(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Referenced resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Stable kind string reported in resource status and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImageUnavailable(_) => "image-unavailable",
            Self::CertificateIssuance(_) => "certificate-issuance-failure",
            Self::CredentialSynthesis(_) => "credential-synthesis-failure",
            Self::SecretUpload(_) => "secret-upload-failure",
            Self::PortAllocation(_) => "port-allocation-failure",
            Self::ContractViolation(_) => "contract-violation",
            Self::PodPlacement(_) => "pod-placement-failure",
            Self::ClusterPki(_) => "cluster-pki-failure",
            Self::HypervisorUnreachable(_) => "hypervisor-unreachable",
            Self::ClusterNotInitialized(_) => "cluster-not-initialized",
            Self::Kube(_) => "kubernetes-api",
            Self::NotFound(_) => "not-found",
            Self::InvalidConfig(_) => "invalid-config",
            Self::Metrics(_) => "metrics",
            Self::Io(_) => "io",
            Self::Watch(_) => "watch",
        }
    }
}
