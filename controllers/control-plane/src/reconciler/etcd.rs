//! etcd store reconciler.
//!
//! Runs a single etcd member per component on the component's hypervisor,
//! listening with client certificate authentication on both the client and
//! the peer port. Membership changes are not handled: every member starts a
//! cluster of its own.

use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::inquirer::ReconcilerInquirer;
use crate::secrets::{self, secrets_path, secrets_path_file};
use hypervisor_client::{Container, Pod, Privileges};
use pki::{CertificateRequest, ExtendedUsage};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, info};

/// Logical port name of the etcd client listener
pub const ETCD_CLIENT_PORT: &str = "etcd-client";
/// Logical port name of the etcd peer listener
pub const ETCD_PEER_PORT: &str = "etcd-peer";

const CLIENT_CONTAINER_PORT: u16 = 2379;
const PEER_CONTAINER_PORT: u16 = 2380;
const DATA_DIR: &str = "/var/lib/etcd";

/// Ensures the store member of a component is running.
///
/// On success `allocated_host_ports["etcd-client"]` of the inquirer's
/// component holds a reachable host port. Safe to call repeatedly.
#[async_trait::async_trait]
pub trait StoreReconciler: Send + Sync {
    async fn reconcile(&self, inquirer: &mut ReconcilerInquirer) -> Result<(), ControllerError>;
}

/// Single-member etcd per component
#[derive(Debug, Clone)]
pub struct EtcdReconciler {
    config: ReconcilerConfig,
}

impl EtcdReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }
}

fn https_url(ip: IpAddr, port: u16) -> String {
    format!("https://{}", SocketAddr::new(ip, port))
}

/// Pod running the etcd member of `component`
pub fn etcd_pod(
    config: &ReconcilerConfig,
    cluster: &str,
    component: &str,
    hypervisor_ip: IpAddr,
    client_host_port: u16,
    peer_host_port: u16,
) -> Pod {
    let root = config.secrets_root.as_str();
    let file = |name: &str| secrets_path_file(root, cluster, component, name);
    let secrets_dir = secrets_path(root, cluster, component);
    let peer_url = https_url(hypervisor_ip, peer_host_port);

    let container = Container::new("etcd", config.images.etcd.clone())
        .with_command(["etcd"])
        .with_args([
            "--name".to_string(),
            component.to_string(),
            "--data-dir".to_string(),
            DATA_DIR.to_string(),
            "--listen-client-urls".to_string(),
            format!("https://0.0.0.0:{}", CLIENT_CONTAINER_PORT),
            "--advertise-client-urls".to_string(),
            https_url(hypervisor_ip, client_host_port),
            "--listen-peer-urls".to_string(),
            format!("https://0.0.0.0:{}", PEER_CONTAINER_PORT),
            "--initial-advertise-peer-urls".to_string(),
            peer_url.clone(),
            "--initial-cluster".to_string(),
            format!("{}={}", component, peer_url),
            "--initial-cluster-state".to_string(),
            "new".to_string(),
            "--cert-file".to_string(),
            file(secrets::ETCD_CERT),
            "--key-file".to_string(),
            file(secrets::ETCD_KEY),
            "--client-cert-auth".to_string(),
            "true".to_string(),
            "--trusted-ca-file".to_string(),
            file(secrets::ETCD_CLIENT_CA_CERT),
            "--peer-cert-file".to_string(),
            file(secrets::ETCD_PEER_CERT),
            "--peer-key-file".to_string(),
            file(secrets::ETCD_PEER_KEY),
            "--peer-client-cert-auth".to_string(),
            "true".to_string(),
            "--peer-trusted-ca-file".to_string(),
            file(secrets::ETCD_CA_CERT),
        ])
        .with_mount(secrets_dir.clone(), secrets_dir)
        .with_mount(format!("{}/{}/{}", DATA_DIR, cluster, component), DATA_DIR);

    Pod::new(
        format!("etcd-{}", cluster),
        vec![container],
        BTreeMap::from([
            (client_host_port, CLIENT_CONTAINER_PORT),
            (peer_host_port, PEER_CONTAINER_PORT),
        ]),
        Privileges::Unprivileged,
    )
}

#[async_trait::async_trait]
impl StoreReconciler for EtcdReconciler {
    async fn reconcile(&self, inquirer: &mut ReconcilerInquirer) -> Result<(), ControllerError> {
        let cluster = inquirer.cluster();
        let (component, hypervisor) = inquirer.parts_mut();
        info!(
            "Reconciling etcd in component {:?}, present in hypervisor {:?}, belonging to cluster {:?}",
            component.name, hypervisor.name, cluster.name
        );

        hypervisor
            .ensure_images(std::slice::from_ref(&self.config.images.etcd))
            .await?;

        let subject = [cluster.name.clone()];
        let sans = [
            hypervisor.ip_address.to_string(),
            "127.0.0.1".to_string(),
            "localhost".to_string(),
        ];
        let usages = [ExtendedUsage::ServerAuth, ExtendedUsage::ClientAuth];
        let request = |name: String| {
            CertificateRequest::new(name)
                .with_organizations(&subject)
                .with_usages(&usages)
                .with_subject_alt_names(sans.clone())
        };
        let server = cluster
            .etcd_server_ca
            .issue(&request(format!("etcd-server-{}", component.name)))
            .map_err(ControllerError::CertificateIssuance)?;
        let peer = cluster
            .etcd_server_ca
            .issue(&request(format!("etcd-peer-{}", component.name)))
            .map_err(ControllerError::CertificateIssuance)?;

        let root = self.config.secrets_root.as_str();
        let file = |name: &str| secrets_path_file(root, &cluster.name, &component.name, name);
        let files = BTreeMap::from([
            (file(secrets::ETCD_CA_CERT), cluster.etcd_server_ca.ca_certificate().to_string()),
            (file(secrets::ETCD_CLIENT_CA_CERT), cluster.etcd_client_ca.ca_certificate().to_string()),
            (file(secrets::ETCD_CERT), server.certificate),
            (file(secrets::ETCD_KEY), server.private_key),
            (file(secrets::ETCD_PEER_CERT), peer.certificate),
            (file(secrets::ETCD_PEER_KEY), peer.private_key),
        ]);
        hypervisor.upload_files(&files).await?;

        let client_port = component.request_port(hypervisor, ETCD_CLIENT_PORT)?;
        let peer_port = component.request_port(hypervisor, ETCD_PEER_PORT)?;
        debug!("etcd ports for {}: client {}, peer {}", component.name, client_port, peer_port);

        let pod = etcd_pod(
            &self.config,
            &cluster.name,
            &component.name,
            hypervisor.ip_address,
            client_port,
            peer_port,
        );
        hypervisor.run_pod(&cluster.name, &pod).await?;
        Ok(())
    }
}
