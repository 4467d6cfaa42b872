//! One-time generation of a cluster's cryptographic material

use crate::authority::{CertificateAuthority, CertificateIssuer, CertificateRequest, ExtendedUsage, IssuedCertificate};
use crate::error::{PkiError, Result};
use rcgen::KeyPair;
use std::fmt;
use tracing::info;

/// Names every API server serving certificate carries
const API_SERVER_SANS: &[&str] = &[
    "127.0.0.1",
    "localhost",
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
];

/// Key pair used to sign and verify service account tokens
#[derive(Clone)]
pub struct ServiceAccountKeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for ServiceAccountKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKeyPair {
    pub fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGeneration(format!("failed to generate service account key: {}", e))
        })?;
        Ok(Self {
            public_key: key_pair.public_key_pem(),
            private_key: key_pair.serialize_pem(),
        })
    }
}

/// All cryptographic material of a cluster
#[derive(Debug, Clone)]
pub struct ClusterPki {
    /// Signs etcd serving and peer certificates
    pub etcd_server_ca: CertificateAuthority,
    /// Trusted by etcd for client authentication
    pub etcd_client_ca: CertificateAuthority,
    /// Trusted by the API server for client authentication; also signs
    /// `api_server_tls`
    pub api_server_client_ca: CertificateAuthority,
    pub api_server_tls: IssuedCertificate,
    pub service_account: ServiceAccountKeyPair,
}

impl ClusterPki {
    /// Generate fresh material for `cluster_name`. Called once per cluster.
    pub fn generate(cluster_name: &str, api_server_extra_sans: &[String]) -> Result<Self> {
        let etcd_server_ca = CertificateAuthority::new(&format!("{}-etcd-ca", cluster_name))?;
        let etcd_client_ca =
            CertificateAuthority::new(&format!("{}-etcd-client-ca", cluster_name))?;
        let api_server_client_ca =
            CertificateAuthority::new(&format!("{}-apiserver-client-ca", cluster_name))?;

        let sans = API_SERVER_SANS
            .iter()
            .map(|san| (*san).to_string())
            .chain(api_server_extra_sans.iter().cloned());
        let api_server_tls = api_server_client_ca.issue(
            &CertificateRequest::new("kube-apiserver")
                .with_usages(&[ExtendedUsage::ServerAuth])
                .with_subject_alt_names(sans),
        )?;

        let service_account = ServiceAccountKeyPair::generate()?;

        info!("Generated PKI for cluster {}", cluster_name);

        Ok(Self {
            etcd_server_ca,
            etcd_client_ca,
            api_server_client_ca,
            api_server_tls,
            service_account,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_authorities() {
        let pki = ClusterPki::generate("demo", &["api.demo.example".to_string()]).unwrap();

        let cas = [
            pki.etcd_server_ca.ca_certificate(),
            pki.etcd_client_ca.ca_certificate(),
            pki.api_server_client_ca.ca_certificate(),
        ];
        assert_ne!(cas[0], cas[1]);
        assert_ne!(cas[1], cas[2]);
        assert_ne!(cas[0], cas[2]);

        assert!(pki.api_server_tls.certificate.contains("BEGIN CERTIFICATE"));
        assert!(pki.service_account.public_key.contains("PUBLIC KEY"));
        assert!(pki.service_account.private_key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_generate_rejects_invalid_extra_san() {
        let result = ClusterPki::generate("demo", &["not valid ü".to_string()]);
        assert!(matches!(result, Err(PkiError::InvalidRequest(_))));
    }
}
