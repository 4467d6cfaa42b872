//! Control plane reconciler.
//!
//! Brings one component to "control plane running" on its hypervisor:
//! kube-apiserver, kube-controller-manager and kube-scheduler in a single pod
//! next to the component's etcd member. Every step is idempotent and the first
//! failure aborts the call without rolling back earlier steps.

use super::etcd::{ETCD_CLIENT_PORT, StoreReconciler};
use crate::cluster::Cluster;
use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::inquirer::ReconcilerInquirer;
use crate::secrets::{self, secrets_path, secrets_path_file};
use hypervisor_client::{Container, Pod, Privileges};
use pki::IssuedCertificate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Where controller-manager and scheduler reach their co-located API server
pub const API_SERVER_LOCAL_ENDPOINT: &str = "https://127.0.0.1:6443";
/// Container port the API server listens on
pub const API_SERVER_CONTAINER_PORT: u16 = 6443;
/// Logical port name of the API server host port
pub const API_SERVER_PORT: &str = "apiserver";

pub const CONTROLLER_MANAGER_USER: &str = "system:kube-controller-manager";
pub const SCHEDULER_USER: &str = "system:kube-scheduler";

/// Credentials derived for one component during one call
#[derive(Debug, Clone)]
pub struct ControlPlaneCredentials {
    /// Authenticates the API server to etcd
    pub etcd_client: IssuedCertificate,
    pub controller_manager_kubeconfig: String,
    pub scheduler_kubeconfig: String,
}

/// Every secret file of a control plane component, keyed by absolute path
pub fn control_plane_secrets(
    secrets_root: &str,
    cluster: &Cluster,
    component: &str,
    credentials: &ControlPlaneCredentials,
) -> BTreeMap<String, String> {
    let file = |name: &str| secrets_path_file(secrets_root, &cluster.name, component, name);
    BTreeMap::from([
        // etcd
        (file(secrets::ETCD_CA_CERT), cluster.etcd_server_ca.ca_certificate().to_string()),
        (file(secrets::APISERVER_ETCD_CLIENT_CERT), credentials.etcd_client.certificate.clone()),
        (file(secrets::APISERVER_ETCD_CLIENT_KEY), credentials.etcd_client.private_key.clone()),
        // API server
        (
            file(secrets::APISERVER_CLIENT_CA_CERT),
            cluster.api_server_client_ca.ca_certificate().to_string(),
        ),
        (file(secrets::APISERVER_CERT), cluster.api_server.tls_certificate.clone()),
        (file(secrets::APISERVER_KEY), cluster.api_server.tls_private_key.clone()),
        (
            file(secrets::SERVICE_ACCOUNT_PUBLIC_KEY),
            cluster.api_server.service_account_public_key.clone(),
        ),
        // controller-manager
        (
            file(secrets::CONTROLLER_MANAGER_KUBECONFIG),
            credentials.controller_manager_kubeconfig.clone(),
        ),
        (
            file(secrets::SERVICE_ACCOUNT_PRIVATE_KEY),
            cluster.api_server.service_account_private_key.clone(),
        ),
        // scheduler
        (file(secrets::SCHEDULER_KUBECONFIG), credentials.scheduler_kubeconfig.clone()),
    ])
}

/// The `control-plane-<cluster>` pod for `component`
pub fn control_plane_pod(
    config: &ReconcilerConfig,
    cluster: &str,
    component: &str,
    etcd_servers: &str,
    api_server_host_port: u16,
) -> Pod {
    let root = config.secrets_root.as_str();
    let file = |name: &str| secrets_path_file(root, cluster, component, name);
    let secrets_dir = secrets_path(root, cluster, component);

    let api_server = Container::new("kube-apiserver", config.images.kube_apiserver.clone())
        .with_command(["kube-apiserver"])
        .with_args([
            "--etcd-servers".to_string(),
            etcd_servers.to_string(),
            "--etcd-cafile".to_string(),
            file(secrets::ETCD_CA_CERT),
            "--etcd-certfile".to_string(),
            file(secrets::APISERVER_ETCD_CLIENT_CERT),
            "--etcd-keyfile".to_string(),
            file(secrets::APISERVER_ETCD_CLIENT_KEY),
            "--anonymous-auth".to_string(),
            "false".to_string(),
            "--authorization-mode".to_string(),
            "Node,RBAC".to_string(),
            "--allow-privileged".to_string(),
            "true".to_string(),
            "--tls-cert-file".to_string(),
            file(secrets::APISERVER_CERT),
            "--tls-private-key-file".to_string(),
            file(secrets::APISERVER_KEY),
            "--client-ca-file".to_string(),
            file(secrets::APISERVER_CLIENT_CA_CERT),
            "--service-account-key-file".to_string(),
            file(secrets::SERVICE_ACCOUNT_PUBLIC_KEY),
            "--kubelet-preferred-address-types".to_string(),
            "ExternalIP,ExternalDNS,Hostname,InternalDNS,InternalIP".to_string(),
        ])
        .with_mount(secrets_dir.clone(), secrets_dir.clone());

    let controller_manager = Container::new(
        "kube-controller-manager",
        config.images.kube_controller_manager.clone(),
    )
    .with_command(["kube-controller-manager"])
    .with_args([
        "--kubeconfig".to_string(),
        file(secrets::CONTROLLER_MANAGER_KUBECONFIG),
        "--service-account-private-key-file".to_string(),
        file(secrets::SERVICE_ACCOUNT_PRIVATE_KEY),
    ])
    .with_mount(secrets_dir.clone(), secrets_dir.clone());

    let scheduler = Container::new("kube-scheduler", config.images.kube_scheduler.clone())
        .with_command(["kube-scheduler"])
        .with_args(["--kubeconfig".to_string(), file(secrets::SCHEDULER_KUBECONFIG)])
        .with_mount(secrets_dir.clone(), secrets_dir);

    Pod::new(
        format!("control-plane-{}", cluster),
        vec![api_server, controller_manager, scheduler],
        BTreeMap::from([(api_server_host_port, API_SERVER_CONTAINER_PORT)]),
        Privileges::Unprivileged,
    )
}

/// Reconciles the control plane of one component.
///
/// Stateless between calls; callers serialize calls per component.
pub struct ControlPlaneReconciler {
    config: ReconcilerConfig,
    store: Arc<dyn StoreReconciler>,
}

impl ControlPlaneReconciler {
    pub fn new(config: ReconcilerConfig, store: Arc<dyn StoreReconciler>) -> Self {
        Self { config, store }
    }

    fn credentials(&self, cluster: &Cluster, component: &str) -> Result<ControlPlaneCredentials, ControllerError> {
        let etcd_client = cluster
            .etcd_client_ca
            .issue_certificate(
                &format!("apiserver-etcd-client-{}", component),
                std::slice::from_ref(&cluster.name),
                &[],
            )
            .map_err(ControllerError::CertificateIssuance)?;

        let controller_manager_kubeconfig = cluster
            .kube_config(API_SERVER_LOCAL_ENDPOINT, CONTROLLER_MANAGER_USER)
            .map_err(ControllerError::CredentialSynthesis)?;
        let scheduler_kubeconfig = cluster
            .kube_config(API_SERVER_LOCAL_ENDPOINT, SCHEDULER_USER)
            .map_err(ControllerError::CredentialSynthesis)?;

        Ok(ControlPlaneCredentials {
            etcd_client,
            controller_manager_kubeconfig,
            scheduler_kubeconfig,
        })
    }

    /// Drive the inquirer's hypervisor toward running the control plane of
    /// its component. Returns the first error encountered.
    pub async fn reconcile(&self, inquirer: &mut ReconcilerInquirer) -> Result<(), ControllerError> {
        let cluster = inquirer.cluster();

        let api_server_port = {
            let (component, hypervisor) = inquirer.parts_mut();
            info!(
                "Reconciling control plane in component {:?}, present in hypervisor {:?}, belonging to cluster {:?}",
                component.name, hypervisor.name, cluster.name
            );

            hypervisor.ensure_images(&self.config.images.control_plane()).await?;

            let credentials = self.credentials(&cluster, &component.name)?;
            let files = control_plane_secrets(&self.config.secrets_root, &cluster, &component.name, &credentials);
            hypervisor.upload_files(&files).await?;

            component.request_port(hypervisor, API_SERVER_PORT)?
        };

        self.store.reconcile(inquirer).await?;

        let (component, hypervisor) = inquirer.parts_mut();
        let etcd_client_port = component
            .allocated_host_ports
            .get(ETCD_CLIENT_PORT)
            .copied()
            .ok_or_else(|| {
                ControllerError::ContractViolation(format!(
                    "store reconciliation of component {} succeeded without allocating an {:?} host port",
                    component.name, ETCD_CLIENT_PORT
                ))
            })?;

        let etcd_servers = self
            .config
            .store_topology
            .store_endpoint(hypervisor.ip_address, etcd_client_port);
        debug!("Component {} uses etcd at {}", component.name, etcd_servers);

        let pod = control_plane_pod(
            &self.config,
            &cluster.name,
            &component.name,
            &etcd_servers,
            api_server_port,
        );
        let handle = hypervisor.run_pod(&cluster.name, &pod).await?;
        info!("Control plane of component {} running as {}", component.name, handle.id);
        Ok(())
    }
}
