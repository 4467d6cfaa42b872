//! Secret file layout on hypervisors.
//!
//! Every component owns `<secrets-root>/<cluster>/<component>/`. Paths are a
//! pure function of their inputs.

/// Store server CA certificate
pub const ETCD_CA_CERT: &str = "etcd-ca.crt";
/// CA trusted by etcd for client certificates
pub const ETCD_CLIENT_CA_CERT: &str = "etcd-client-ca.crt";
pub const ETCD_CERT: &str = "etcd.crt";
pub const ETCD_KEY: &str = "etcd.key";
pub const ETCD_PEER_CERT: &str = "etcd-peer.crt";
pub const ETCD_PEER_KEY: &str = "etcd-peer.key";

pub const APISERVER_ETCD_CLIENT_CERT: &str = "apiserver-etcd-client.crt";
pub const APISERVER_ETCD_CLIENT_KEY: &str = "apiserver-etcd-client.key";
pub const APISERVER_CLIENT_CA_CERT: &str = "apiserver-client-ca.crt";
pub const APISERVER_CERT: &str = "apiserver.crt";
pub const APISERVER_KEY: &str = "apiserver.key";
pub const SERVICE_ACCOUNT_PUBLIC_KEY: &str = "service-account-pub.key";

pub const CONTROLLER_MANAGER_KUBECONFIG: &str = "controller-manager.kubeconfig";
/// Service account signing key; only the controller-manager reads it
pub const SERVICE_ACCOUNT_PRIVATE_KEY: &str = "service-account.key";

pub const SCHEDULER_KUBECONFIG: &str = "scheduler.kubeconfig";

/// Secrets directory of `component` in `cluster`
pub fn secrets_path(root: &str, cluster: &str, component: &str) -> String {
    format!("{}/{}/{}", root.trim_end_matches('/'), cluster, component)
}

/// Path of `file` inside the secrets directory of `component` in `cluster`
pub fn secrets_path_file(root: &str, cluster: &str, component: &str, file: &str) -> String {
    format!("{}/{}", secrets_path(root, cluster, component), file)
}
