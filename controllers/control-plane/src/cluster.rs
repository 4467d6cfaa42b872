//! Cluster domain model.
//!
//! A `Cluster` is loaded from the `Cluster` resource's status. Its material
//! is immutable; reconcilers only read it or ask its authorities to issue
//! derived certificates.

use crate::error::ControllerError;
use pki::{CertificateAuthority, CertificateIssuer, ExtendedUsage, KubeConfig, PkiError};
use std::fmt;
use std::sync::Arc;

/// The API server's own serving pair and service account signing pair
#[derive(Clone)]
pub struct ApiServerSecrets {
    pub tls_certificate: String,
    pub tls_private_key: String,
    pub service_account_public_key: String,
    pub service_account_private_key: String,
}

impl fmt::Debug for ApiServerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiServerSecrets")
            .field("tls_certificate", &self.tls_certificate)
            .field("service_account_public_key", &self.service_account_public_key)
            .finish_non_exhaustive()
    }
}

/// A cluster and its trust domains
pub struct Cluster {
    pub name: String,
    /// Signs etcd serving and peer certificates
    pub etcd_server_ca: Arc<dyn CertificateIssuer>,
    /// Trusted by etcd for client certificates
    pub etcd_client_ca: Arc<dyn CertificateIssuer>,
    /// Trusted by the API server for client certificates; also signs the API
    /// server serving certificate
    pub api_server_client_ca: Arc<dyn CertificateIssuer>,
    pub api_server: ApiServerSecrets,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("api_server", &self.api_server)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Load a cluster from its resource. Fails until the cluster reconciler
    /// has written the cluster PKI into status.
    pub fn from_resource(resource: &crds::Cluster) -> Result<Self, ControllerError> {
        let name = resource
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("Cluster missing name".to_string()))?;

        let status = resource.status.as_ref();
        let (Some(authorities), Some(etcd_server), Some(api_server)) = (
            status.and_then(|s| s.certificate_authorities.as_ref()),
            status.and_then(|s| s.etcd_server.as_ref()),
            status.and_then(|s| s.api_server.as_ref()),
        ) else {
            return Err(ControllerError::ClusterNotInitialized(name));
        };

        let load = |pair: &crds::CertificatePair| -> Result<Arc<dyn CertificateIssuer>, ControllerError> {
            let ca = CertificateAuthority::from_pem(&pair.certificate, &pair.private_key)
                .map_err(ControllerError::ClusterPki)?;
            Ok(Arc::new(ca))
        };

        Ok(Self {
            etcd_server_ca: load(&etcd_server.ca)?,
            etcd_client_ca: load(&authorities.etcd_client)?,
            api_server_client_ca: load(&authorities.api_server_client)?,
            api_server: ApiServerSecrets {
                tls_certificate: api_server.tls_cert.clone(),
                tls_private_key: api_server.tls_private_key.clone(),
                service_account_public_key: api_server.service_account_public_key.clone(),
                service_account_private_key: api_server.service_account_private_key.clone(),
            },
            name,
        })
    }

    /// Kubeconfig for `user` connecting to `endpoint`, trusting the
    /// API-server-client CA and authenticating with a client certificate
    /// issued by it
    pub fn kube_config(&self, endpoint: &str, user: &str) -> Result<String, PkiError> {
        let client = self
            .api_server_client_ca
            .issue_certificate(user, &[], &[ExtendedUsage::ClientAuth])?;
        KubeConfig::new(
            &self.name,
            endpoint,
            self.api_server_client_ca.ca_certificate(),
            user,
            &client,
        )
        .to_yaml()
    }
}
