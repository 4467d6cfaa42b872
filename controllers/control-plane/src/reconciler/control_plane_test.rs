//! Tests for the control plane reconciler

use super::control_plane::*;
use super::etcd::{ETCD_CLIENT_PORT, StoreReconciler};
use crate::error::ControllerError;
use crate::secrets;
use crate::test_utils::*;
use hypervisor_client::{MockHypervisorClient, Privileges};
use pki::{ExtendedUsage, KubeConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct Fixture {
    cluster: TestCluster,
    mock: MockHypervisorClient,
    store: Arc<FakeStore>,
    reconciler: ControlPlaneReconciler,
}

fn fixture(store: FakeStore) -> (Fixture, crate::inquirer::ReconcilerInquirer) {
    let cluster = create_test_cluster("demo");
    let (hypervisor, mock) = create_test_hypervisor("hv-1", "10.0.0.5", 30443, 32767);
    let inquirer = create_test_inquirer(&cluster, hypervisor, "demo-cp-1");
    let store = Arc::new(store);
    let reconciler = ControlPlaneReconciler::new(test_config(), store.clone() as Arc<dyn StoreReconciler>);
    (
        Fixture {
            cluster,
            mock,
            store,
            reconciler,
        },
        inquirer,
    )
}

fn secret(file: &str) -> String {
    secrets::secrets_path_file(TEST_SECRETS_ROOT, "demo", "demo-cp-1", file)
}

#[tokio::test]
async fn test_fresh_component_runs_control_plane() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));

    f.reconciler.reconcile(&mut inquirer).await.unwrap();

    assert_eq!(inquirer.component().allocated_host_ports[API_SERVER_PORT], 30443);
    assert_eq!(inquirer.component().allocated_host_ports[ETCD_CLIENT_PORT], 32001);
    assert_eq!(f.store.calls(), 1);

    let pod = f.mock.pod("demo", "control-plane-demo").unwrap();
    assert_eq!(pod.ports, BTreeMap::from([(30443, 6443)]));
    let api_server = pod.container("kube-apiserver").unwrap();
    assert_eq!(api_server.arg_value("--etcd-servers"), Some("https://10.0.0.5:32001"));
    let expected_images: BTreeSet<String> = test_config().images.control_plane().into_iter().collect();
    assert_eq!(f.mock.images(), expected_images);
}

#[tokio::test]
async fn test_secrets_are_uploaded_under_component_directory() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));

    f.reconciler.reconcile(&mut inquirer).await.unwrap();

    let uploads = f.mock.uploads();
    assert_eq!(uploads.len(), 1);
    let paths: Vec<&String> = uploads[0].keys().collect();
    let mut expected = vec![
        secret(secrets::ETCD_CA_CERT),
        secret(secrets::APISERVER_ETCD_CLIENT_CERT),
        secret(secrets::APISERVER_ETCD_CLIENT_KEY),
        secret(secrets::APISERVER_CLIENT_CA_CERT),
        secret(secrets::APISERVER_CERT),
        secret(secrets::APISERVER_KEY),
        secret(secrets::SERVICE_ACCOUNT_PUBLIC_KEY),
        secret(secrets::CONTROLLER_MANAGER_KUBECONFIG),
        secret(secrets::SERVICE_ACCOUNT_PRIVATE_KEY),
        secret(secrets::SCHEDULER_KUBECONFIG),
    ];
    expected.sort();
    assert_eq!(paths, expected.iter().collect::<Vec<_>>());
    assert!(paths.iter().all(|p| p.starts_with("/var/lib/cp-secrets/demo/demo-cp-1/")));

    let cluster = &f.cluster.cluster;
    assert_eq!(uploads[0][&secret(secrets::ETCD_CA_CERT)], cluster.etcd_server_ca.ca_certificate());
    assert_eq!(
        uploads[0][&secret(secrets::SERVICE_ACCOUNT_PRIVATE_KEY)],
        cluster.api_server.service_account_private_key
    );
}

#[tokio::test]
async fn test_missing_image_aborts_before_any_other_step() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));
    f.mock.fail_ensure_images("kube-apiserver:v1.17.0 not found");

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert!(matches!(err, ControllerError::ImageUnavailable(_)));
    assert_eq!(f.cluster.issue_calls(), 0);
    assert_eq!(f.mock.upload_calls(), 0);
    assert!(inquirer.component().allocated_host_ports.is_empty());
    assert!(inquirer.hypervisor().allocated_ports.is_empty());
    assert_eq!(f.store.calls(), 0);
    assert_eq!(f.mock.run_pod_calls(), 0);
}

#[tokio::test]
async fn test_upload_failure_aborts_before_port_allocation() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));
    f.mock.fail_upload_files("disk full");

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert_eq!(err.kind(), "secret-upload-failure");
    assert!(inquirer.component().allocated_host_ports.is_empty());
    assert_eq!(f.store.calls(), 0);
    assert_eq!(f.mock.run_pod_calls(), 0);
}

#[tokio::test]
async fn test_store_without_client_port_is_a_contract_violation() {
    let (f, mut inquirer) = fixture(FakeStore::without_client_port());

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert!(matches!(err, ControllerError::ContractViolation(_)));
    assert_eq!(f.mock.run_pod_calls(), 0);
    assert_eq!(inquirer.component().allocated_host_ports[API_SERVER_PORT], 30443);
}

#[tokio::test]
async fn test_repeated_reconcile_is_idempotent() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));

    f.reconciler.reconcile(&mut inquirer).await.unwrap();
    let ports = inquirer.component().allocated_host_ports.clone();
    let allocated = inquirer.hypervisor().allocated_ports.clone();
    f.reconciler.reconcile(&mut inquirer).await.unwrap();

    assert_eq!(inquirer.component().allocated_host_ports, ports);
    assert_eq!(inquirer.hypervisor().allocated_ports, allocated);
    assert_eq!(f.mock.run_pod_calls(), 2);
    assert_eq!(f.mock.pod_replacements(), 0);

    let uploads = f.mock.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0], uploads[1]);
}

#[tokio::test]
async fn test_credentials_are_scoped_per_identity() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));

    f.reconciler.reconcile(&mut inquirer).await.unwrap();

    let etcd_client = f.cluster.etcd_client_ca.requests();
    assert_eq!(etcd_client.len(), 1);
    assert_eq!(etcd_client[0].common_name, "apiserver-etcd-client-demo-cp-1");
    assert_eq!(etcd_client[0].organizations, vec!["demo".to_string()]);

    let api_clients = f.cluster.api_server_client_ca.requests();
    let names: Vec<&str> = api_clients.iter().map(|r| r.common_name.as_str()).collect();
    assert_eq!(names, vec![CONTROLLER_MANAGER_USER, SCHEDULER_USER]);
    assert!(api_clients.iter().all(|r| r.usages == vec![ExtendedUsage::ClientAuth]));
    assert_eq!(f.cluster.etcd_server_ca.calls(), 0);

    let files = f.mock.files();
    let controller_manager =
        KubeConfig::from_yaml(&files[&secret(secrets::CONTROLLER_MANAGER_KUBECONFIG)]).unwrap();
    let scheduler = KubeConfig::from_yaml(&files[&secret(secrets::SCHEDULER_KUBECONFIG)]).unwrap();
    assert_eq!(controller_manager.users[0].name, CONTROLLER_MANAGER_USER);
    assert_eq!(scheduler.users[0].name, SCHEDULER_USER);
    assert_eq!(controller_manager.clusters[0].cluster.server, API_SERVER_LOCAL_ENDPOINT);
    assert_ne!(controller_manager.users[0].user, scheduler.users[0].user);
}

#[tokio::test]
async fn test_etcd_client_certificate_failure() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));
    f.cluster.etcd_client_ca.fail_issuance();

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert_eq!(err.kind(), "certificate-issuance-failure");
    assert_eq!(f.mock.upload_calls(), 0);
    assert!(inquirer.component().allocated_host_ports.is_empty());
}

#[tokio::test]
async fn test_kubeconfig_failure_is_credential_synthesis() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));
    f.cluster.api_server_client_ca.fail_issuance();

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert_eq!(err.kind(), "credential-synthesis-failure");
    assert_eq!(f.mock.upload_calls(), 0);
}

#[tokio::test]
async fn test_pod_placement_failure_keeps_ports() {
    let (f, mut inquirer) = fixture(FakeStore::with_client_port(32001));
    f.mock.fail_run_pod("agent unavailable");

    let err = f.reconciler.reconcile(&mut inquirer).await.unwrap_err();

    assert!(matches!(err, ControllerError::PodPlacement(_)));
    assert_eq!(f.store.calls(), 1);
    assert_eq!(inquirer.component().allocated_host_ports[API_SERVER_PORT], 30443);
    assert!(f.mock.pod("demo", "control-plane-demo").is_none());

    // Retrying after the agent recovers reuses the same port.
    f.mock.clear_failures();
    f.reconciler.reconcile(&mut inquirer).await.unwrap();
    assert_eq!(inquirer.component().allocated_host_ports[API_SERVER_PORT], 30443);
}

#[test]
fn test_control_plane_pod_shape() {
    let config = test_config();
    let pod = control_plane_pod(&config, "demo", "demo-cp-1", "https://10.0.0.5:32001", 30443);
    let secrets_dir = secrets::secrets_path(TEST_SECRETS_ROOT, "demo", "demo-cp-1");

    assert_eq!(pod.name, "control-plane-demo");
    assert_eq!(pod.privileges, Privileges::Unprivileged);
    let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["kube-apiserver", "kube-controller-manager", "kube-scheduler"]);
    assert!(pod.containers.iter().all(|c| c.mounts.get(&secrets_dir) == Some(&secrets_dir)));

    let api_server = pod.container("kube-apiserver").unwrap();
    assert_eq!(api_server.image, config.images.kube_apiserver);
    assert_eq!(api_server.arg_value("--anonymous-auth"), Some("false"));
    assert_eq!(api_server.arg_value("--authorization-mode"), Some("Node,RBAC"));
    assert_eq!(
        api_server.arg_value("--client-ca-file"),
        Some(secret(secrets::APISERVER_CLIENT_CA_CERT).as_str())
    );

    let controller_manager = pod.container("kube-controller-manager").unwrap();
    assert_eq!(
        controller_manager.arg_value("--service-account-private-key-file"),
        Some(secret(secrets::SERVICE_ACCOUNT_PRIVATE_KEY).as_str())
    );

    let scheduler = pod.container("kube-scheduler").unwrap();
    assert_eq!(scheduler.args, vec!["--kubeconfig".to_string(), secret(secrets::SCHEDULER_KUBECONFIG)]);
}
