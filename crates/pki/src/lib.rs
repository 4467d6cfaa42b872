//! PKI for control planes
//!
//! Certificate authorities that issue component certificates, one-time
//! generation of a cluster's cryptographic material, and kubeconfig
//! rendering for clients of the API server.
//!
//! # Example
//!
//! ```no_run
//! use pki::{CertificateAuthority, CertificateIssuer, KubeConfig};
//!
//! # fn example() -> Result<(), pki::PkiError> {
//! let ca = CertificateAuthority::new("demo-apiserver-client-ca")?;
//! let client = ca.issue_certificate("system:kube-scheduler", &[], &[])?;
//! let kubeconfig = KubeConfig::new(
//!     "demo",
//!     "https://127.0.0.1:6443",
//!     ca.ca_certificate(),
//!     "system:kube-scheduler",
//!     &client,
//! )
//! .to_yaml()?;
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod cluster_pki;
pub mod error;
pub mod kubeconfig;

pub use authority::{
    CertificateAuthority, CertificateIssuer, CertificateRequest, ExtendedUsage, IssuedCertificate,
};
pub use cluster_pki::{ClusterPki, ServiceAccountKeyPair};
pub use error::PkiError;
pub use kubeconfig::KubeConfig;
