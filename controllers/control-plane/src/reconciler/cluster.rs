//! Cluster reconciler.
//!
//! Generates a cluster's PKI the first time the cluster is seen and stores it
//! in `Cluster.status`. Existing material is never regenerated.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{ApiServer, CertificateAuthorities, CertificatePair, ClusterStatus, EtcdServer};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use pki::{CertificateAuthority, CertificateIssuer, ClusterPki};
use std::time::Instant;
use tracing::{debug, info};

fn certificate_pair(ca: &CertificateAuthority) -> CertificatePair {
    CertificatePair {
        certificate: ca.ca_certificate().to_string(),
        private_key: ca.ca_key_pem().to_string(),
    }
}

/// Status carrying all of `pki`
pub fn cluster_status(pki: &ClusterPki) -> ClusterStatus {
    ClusterStatus {
        certificate_authorities: Some(CertificateAuthorities {
            etcd_client: certificate_pair(&pki.etcd_client_ca),
            api_server_client: certificate_pair(&pki.api_server_client_ca),
        }),
        etcd_server: Some(EtcdServer {
            ca: certificate_pair(&pki.etcd_server_ca),
        }),
        api_server: Some(ApiServer {
            tls_cert: pki.api_server_tls.certificate.clone(),
            tls_private_key: pki.api_server_tls.private_key.clone(),
            service_account_public_key: pki.service_account.public_key.clone(),
            service_account_private_key: pki.service_account.private_key.clone(),
        }),
    }
}

impl Reconciler {
    /// Reconciles a Cluster resource.
    pub async fn reconcile_cluster(&self, cluster: &crds::Cluster) -> Result<(), ControllerError> {
        let started = Instant::now();
        let result = self.initialize_cluster(cluster).await;
        match &result {
            Ok(()) => self.metrics.reconciled("Cluster", started.elapsed()),
            Err(e) => self.metrics.reconcile_failed("Cluster", e.kind(), started.elapsed()),
        }
        result
    }

    async fn initialize_cluster(&self, cluster: &crds::Cluster) -> Result<(), ControllerError> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());

        if cluster.status.as_ref().is_some_and(ClusterStatus::is_initialized) {
            debug!("Cluster {}/{} already initialized", namespace, name);
            return Ok(());
        }

        info!("Generating PKI for cluster {}/{}", namespace, name);
        let pki = ClusterPki::generate(&name, &cluster.spec.api_server_extra_sans)
            .map_err(ControllerError::ClusterPki)?;
        let patch = serde_json::json!({ "status": cluster_status(&pki) });

        let api: Api<crds::Cluster> = Api::namespaced(self.client.clone(), &namespace);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Cluster {}/{} initialized", namespace, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_status_is_complete_and_loadable() {
        let pki = ClusterPki::generate("demo", &[]).unwrap();
        let status = cluster_status(&pki);
        assert!(status.is_initialized());

        let etcd_ca = &status.etcd_server.as_ref().unwrap().ca;
        let reloaded = CertificateAuthority::from_pem(&etcd_ca.certificate, &etcd_ca.private_key).unwrap();
        assert_eq!(reloaded.ca_certificate(), pki.etcd_server_ca.ca_certificate());
    }

    #[test]
    fn test_cluster_status_serializes_camel_case() {
        let pki = ClusterPki::generate("demo", &[]).unwrap();
        let value = serde_json::to_value(cluster_status(&pki)).unwrap();
        assert!(value["certificateAuthorities"]["apiServerClient"]["privateKey"].is_string());
        assert!(value["apiServer"]["serviceAccountPublicKey"].is_string());
    }
}
