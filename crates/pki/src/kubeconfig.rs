//! Kubeconfig rendering
//!
//! Builds a single-cluster, single-user kubeconfig with all certificate
//! material embedded as base64 data fields.

use crate::authority::IssuedCertificate;
use crate::error::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    pub certificate_authority_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    pub client_certificate_data: String,
    pub client_key_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

impl KubeConfig {
    /// Kubeconfig for `user` talking to `server` of cluster `cluster_name`
    pub fn new(
        cluster_name: &str,
        server: &str,
        ca_certificate: &str,
        user: &str,
        client: &IssuedCertificate,
    ) -> Self {
        let context = format!("{}@{}", user, cluster_name);
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: cluster_name.to_string(),
                cluster: ClusterEntry {
                    server: server.to_string(),
                    certificate_authority_data: STANDARD.encode(ca_certificate),
                },
            }],
            users: vec![NamedUser {
                name: user.to_string(),
                user: UserEntry {
                    client_certificate_data: STANDARD.encode(&client.certificate),
                    client_key_data: STANDARD.encode(&client.private_key),
                },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: ContextEntry {
                    cluster: cluster_name.to_string(),
                    user: user.to_string(),
                },
            }],
            current_context: context,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> IssuedCertificate {
        IssuedCertificate {
            certificate: "client-cert".to_string(),
            private_key: "client-key".to_string(),
        }
    }

    #[test]
    fn test_kubeconfig_uses_kubectl_field_names() {
        let yaml = KubeConfig::new("demo", "https://127.0.0.1:6443", "ca", "system:kube-scheduler", &client())
            .to_yaml()
            .unwrap();

        assert!(yaml.contains("apiVersion: v1"));
        assert!(yaml.contains("kind: Config"));
        assert!(yaml.contains("current-context: system:kube-scheduler@demo"));
        assert!(yaml.contains("certificate-authority-data:"));
        assert!(yaml.contains("client-certificate-data:"));
        assert!(yaml.contains("client-key-data:"));
        assert!(yaml.contains("server: https://127.0.0.1:6443"));
    }

    #[test]
    fn test_kubeconfig_embeds_base64_material() {
        let config = KubeConfig::new("demo", "https://127.0.0.1:6443", "ca-pem", "admin", &client());
        let parsed = KubeConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();

        assert_eq!(parsed, config);
        let ca = STANDARD
            .decode(&parsed.clusters[0].cluster.certificate_authority_data)
            .unwrap();
        assert_eq!(ca, b"ca-pem");
        let key = STANDARD.decode(&parsed.users[0].user.client_key_data).unwrap();
        assert_eq!(key, b"client-key");
    }
}
