//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::cluster::Cluster;
use crate::component::Component;
use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::hypervisor::{Hypervisor, PortOwner};
use crate::inquirer::ReconcilerInquirer;
use crate::reconciler::cluster::cluster_status;
use crate::reconciler::etcd::{ETCD_CLIENT_PORT, StoreReconciler};
use hypervisor_client::{HypervisorClientTrait, MockHypervisorClient};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pki::{CertificateIssuer, CertificateRequest, ClusterPki, IssuedCertificate, PkiError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_SECRETS_ROOT: &str = "/var/lib/cp-secrets";

/// Reconciler configuration with a recognizable secrets root
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        secrets_root: TEST_SECRETS_ROOT.to_string(),
        ..Default::default()
    }
}

/// Helper to create an initialized Cluster CRD with freshly generated PKI
pub fn create_test_cluster_resource(name: &str) -> crds::Cluster {
    let pki = ClusterPki::generate(name, &[]).expect("generate cluster PKI");
    crds::Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: crds::ClusterSpec::default(),
        status: Some(cluster_status(&pki)),
    }
}

/// Issuer wrapper recording every request, with optional injected failure
pub struct CountingIssuer {
    inner: Arc<dyn CertificateIssuer>,
    requests: Mutex<Vec<CertificateRequest>>,
    fail: AtomicBool,
}

impl CountingIssuer {
    pub fn new(inner: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CertificateRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Make every following issuance fail
    pub fn fail_issuance(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl CertificateIssuer for CountingIssuer {
    fn ca_certificate(&self) -> &str {
        self.inner.ca_certificate()
    }

    fn issue(&self, request: &CertificateRequest) -> pki::error::Result<IssuedCertificate> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PkiError::CertificateGeneration(format!(
                "injected failure for {}",
                request.common_name
            )));
        }
        self.inner.issue(request)
    }
}

/// A loaded cluster whose authorities count their issuances
pub struct TestCluster {
    pub cluster: Arc<Cluster>,
    pub etcd_server_ca: Arc<CountingIssuer>,
    pub etcd_client_ca: Arc<CountingIssuer>,
    pub api_server_client_ca: Arc<CountingIssuer>,
}

impl TestCluster {
    /// Issuances across all three authorities
    pub fn issue_calls(&self) -> usize {
        self.etcd_server_ca.calls() + self.etcd_client_ca.calls() + self.api_server_client_ca.calls()
    }
}

pub fn create_test_cluster(name: &str) -> TestCluster {
    let loaded = Cluster::from_resource(&create_test_cluster_resource(name)).expect("load test cluster");
    let etcd_server_ca = Arc::new(CountingIssuer::new(loaded.etcd_server_ca));
    let etcd_client_ca = Arc::new(CountingIssuer::new(loaded.etcd_client_ca));
    let api_server_client_ca = Arc::new(CountingIssuer::new(loaded.api_server_client_ca));

    let cluster = Cluster {
        name: loaded.name,
        etcd_server_ca: etcd_server_ca.clone(),
        etcd_client_ca: etcd_client_ca.clone(),
        api_server_client_ca: api_server_client_ca.clone(),
        api_server: loaded.api_server,
    };

    TestCluster {
        cluster: Arc::new(cluster),
        etcd_server_ca,
        etcd_client_ca,
        api_server_client_ca,
    }
}

/// Helper to create a hypervisor backed by a mock agent. The returned mock
/// shares state with the one the hypervisor uses.
pub fn create_test_hypervisor(name: &str, ip: &str, low: u16, high: u16) -> (Hypervisor, MockHypervisorClient) {
    let mock = MockHypervisorClient::new(format!("mock://{}", name));
    let hypervisor = Hypervisor::new(name, ip.parse().expect("test IP address"), low..=high, Arc::new(mock.clone()));
    (hypervisor, mock)
}

pub fn mock_client() -> Arc<dyn HypervisorClientTrait> {
    Arc::new(MockHypervisorClient::new("mock://hypervisor"))
}

/// Helper to create test Hypervisor CRD with the given port allocations
pub fn create_test_hypervisor_resource(name: &str, ip: &str, ports: &[(u16, &str, &str)]) -> crds::Hypervisor {
    let status = (!ports.is_empty()).then(|| crds::HypervisorStatus {
        allocated_ports: ports
            .iter()
            .map(|(port, cluster, component)| crds::AllocatedPort {
                port: *port,
                cluster: cluster.to_string(),
                component: component.to_string(),
            })
            .collect(),
    });

    crds::Hypervisor {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: crds::HypervisorSpec {
            ip_address: ip.to_string(),
            endpoint: format!("https://{}:9443", ip),
            port_range: crds::PortRange {
                low: 30000,
                high: 30999,
            },
        },
        status,
    }
}

/// Helper to create test Component CRD placed on `hypervisor`
pub fn create_test_component_resource(name: &str, cluster: &str, hypervisor: &str) -> crds::Component {
    crds::Component {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: crds::ComponentSpec {
            cluster: cluster.to_string(),
            hypervisor: hypervisor.to_string(),
            role: crds::ComponentRole::default(),
        },
        status: None,
    }
}

/// Inquirer for `component` of `cluster` placed on `hypervisor`
pub fn create_test_inquirer(cluster: &TestCluster, hypervisor: Hypervisor, component: &str) -> ReconcilerInquirer {
    let component = Component::new(component, cluster.cluster.name.clone(), hypervisor.name.clone());
    ReconcilerInquirer::new(component, hypervisor, Arc::clone(&cluster.cluster))
}

/// Store reconciler that only records an etcd-client port
pub struct FakeStore {
    client_port: Option<u16>,
    calls: AtomicUsize,
}

impl FakeStore {
    /// Store that reports `port` as the etcd-client host port
    pub fn with_client_port(port: u16) -> Self {
        Self {
            client_port: Some(port),
            calls: AtomicUsize::new(0),
        }
    }

    /// Store that succeeds without allocating anything
    pub fn without_client_port() -> Self {
        Self {
            client_port: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StoreReconciler for FakeStore {
    async fn reconcile(&self, inquirer: &mut ReconcilerInquirer) -> Result<(), ControllerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(port) = self.client_port {
            let (component, hypervisor) = inquirer.parts_mut();
            component.allocated_host_ports.insert(ETCD_CLIENT_PORT.to_string(), port);
            hypervisor.claim_port(
                port,
                PortOwner {
                    cluster: component.cluster.clone(),
                    component: component.name.clone(),
                },
            );
        }
        Ok(())
    }
}
