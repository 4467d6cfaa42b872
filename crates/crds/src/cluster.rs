//! Cluster CRD
//!
//! Declares a cluster and carries its cryptographic material once generated.
//! Everything under `status` is written exactly once by the cluster
//! reconciler and treated as immutable afterwards.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "controlplane.infra.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Extra subject alternative names for the API server serving certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_server_extra_sans: Vec<String>,
}

/// A PEM encoded certificate together with its private key
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePair {
    pub certificate: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthorities {
    /// CA trusted by etcd to authenticate its clients (the API servers)
    pub etcd_client: CertificatePair,

    /// CA trusted by the API server to authenticate its clients. Also signs
    /// the API server serving certificate.
    pub api_server_client: CertificatePair,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdServer {
    /// CA that signs etcd serving and peer certificates
    pub ca: CertificatePair,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    pub tls_cert: String,
    pub tls_private_key: String,
    pub service_account_public_key: String,
    pub service_account_private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authorities: Option<CertificateAuthorities>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_server: Option<EtcdServer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServer>,
}

impl ClusterStatus {
    /// Whether all cryptographic material has been generated
    pub fn is_initialized(&self) -> bool {
        self.certificate_authorities.is_some()
            && self.etcd_server.is_some()
            && self.api_server.is_some()
    }
}
