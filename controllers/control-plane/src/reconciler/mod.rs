//! Reconciliation logic for control plane CRDs.
//!
//! - `control_plane`: the control plane pipeline for one component
//! - `etcd`: the store member the control plane depends on
//! - `cluster`: one-time cluster PKI generation
//!
//! `Reconciler` is the Kubernetes-facing side: it loads the resources a
//! component references into an inquirer, serializes work per hypervisor,
//! runs the pipeline and writes allocated ports and the outcome back.

pub mod cluster;
pub mod control_plane;
#[cfg(test)]
mod control_plane_test;
pub mod etcd;

use crate::backoff::BackoffRegistry;
use crate::cluster::Cluster;
use crate::component::Component;
use crate::error::ControllerError;
use crate::hypervisor::{Hypervisor, PortOwner};
use crate::inquirer::ReconcilerInquirer;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use control_plane::ControlPlaneReconciler;
use crds::{AllocatedPort, ComponentStatus, HypervisorStatus, ReconcileState};
use hypervisor_client::{HypervisorClient, HypervisorClientTrait};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Status a component should have after a reconciliation.
///
/// `ports` is `None` when the call failed before the component was loaded;
/// the recorded ports are kept then. `lastConverged` only moves when the
/// component becomes converged.
pub(crate) fn component_status(
    current: Option<&ComponentStatus>,
    ports: Option<BTreeMap<String, u16>>,
    result: &Result<(), ControllerError>,
    now: DateTime<Utc>,
) -> ComponentStatus {
    let current = current.cloned().unwrap_or_default();
    let allocated_host_ports = ports.unwrap_or(current.allocated_host_ports);
    match result {
        Ok(()) => ComponentStatus {
            allocated_host_ports,
            state: ReconcileState::Converged,
            error_kind: None,
            error: None,
            last_converged: match current.state {
                ReconcileState::Converged => current.last_converged.or(Some(now)),
                _ => Some(now),
            },
        },
        Err(e) => ComponentStatus {
            allocated_host_ports,
            state: ReconcileState::Failed,
            error_kind: Some(e.kind().to_string()),
            error: Some(e.to_string()),
            last_converged: current.last_converged,
        },
    }
}

/// Merge patch writing `status`, with explicit nulls so cleared fields are
/// removed
pub(crate) fn create_component_status_patch(status: &ComponentStatus) -> serde_json::Value {
    let state_str = match status.state {
        ReconcileState::Pending => "Pending",
        ReconcileState::Converged => "Converged",
        ReconcileState::Failed => "Failed",
    };
    serde_json::json!({
        "status": {
            "allocatedHostPorts": status.allocated_host_ports,
            "state": state_str,
            "errorKind": status.error_kind,
            "error": status.error,
            "lastConverged": status.last_converged,
        }
    })
}

/// Hypervisor status listing every allocated port. Ports of deleted
/// components are dropped by `release_ports_except` before this is written.
pub(crate) fn hypervisor_status(hypervisor: &Hypervisor) -> HypervisorStatus {
    HypervisorStatus {
        allocated_ports: hypervisor
            .allocated_ports
            .iter()
            .map(|(port, owner)| AllocatedPort {
                port: *port,
                cluster: owner.cluster.clone(),
                component: owner.component.clone(),
            })
            .collect(),
    }
}

/// Owners that may hold ports on `hypervisor`: every existing component
/// placed on it. Ports of anyone else are left over from removed components.
pub(crate) fn port_owners_on(hypervisor: &str, components: &[crds::Component]) -> BTreeSet<PortOwner> {
    components
        .iter()
        .filter(|c| c.spec.hypervisor == hypervisor)
        .map(|c| PortOwner {
            cluster: c.spec.cluster.clone(),
            component: c.name_any(),
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reconciles control plane resources.
pub struct Reconciler {
    client: Client,
    control_plane: ControlPlaneReconciler,
    hypervisor_token: Option<String>,
    resync: Duration,
    metrics: Metrics,
    /// Agent clients by endpoint
    hypervisor_clients: Mutex<HashMap<String, Arc<dyn HypervisorClientTrait>>>,
    /// Loaded clusters by `namespace/name/uid`; their CAs memoize issued
    /// certificates across calls
    clusters: Mutex<HashMap<String, Arc<Cluster>>>,
    /// One lock per `namespace/hypervisor`; the port space is shared
    hypervisor_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    backoff: BackoffRegistry,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Client,
        control_plane: ControlPlaneReconciler,
        hypervisor_token: Option<String>,
        resync: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            control_plane,
            hypervisor_token,
            resync,
            metrics,
            hypervisor_clients: Mutex::new(HashMap::new()),
            clusters: Mutex::new(HashMap::new()),
            hypervisor_locks: Mutex::new(HashMap::new()),
            backoff: BackoffRegistry::default(),
        }
    }

    /// Requeue interval after success
    pub fn resync(&self) -> Duration {
        self.resync
    }

    /// Record a failed reconciliation of `key` and return the delay before the
    /// next attempt
    pub fn backoff_for_failure(&self, key: &str) -> Duration {
        let (delay, error_count) = self.backoff.record_failure(key);
        warn!("{} failed {} time(s) in a row, retrying in {:?}", key, error_count, delay);
        delay
    }

    fn hypervisor_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.hypervisor_locks).entry(key.to_string()).or_default())
    }

    fn hypervisor_client(&self, endpoint: &str) -> Result<Arc<dyn HypervisorClientTrait>, ControllerError> {
        let mut clients = lock(&self.hypervisor_clients);
        if let Some(client) = clients.get(endpoint) {
            return Ok(Arc::clone(client));
        }
        let client = HypervisorClient::new(endpoint.to_string(), self.hypervisor_token.clone())
            .map_err(|e| ControllerError::InvalidConfig(format!("hypervisor client for {}: {}", endpoint, e)))?;
        let client: Arc<dyn HypervisorClientTrait> = Arc::new(client);
        clients.insert(endpoint.to_string(), Arc::clone(&client));
        Ok(client)
    }

    async fn load_cluster(&self, namespace: &str, name: &str) -> Result<Arc<Cluster>, ControllerError> {
        let api: Api<crds::Cluster> = Api::namespaced(self.client.clone(), namespace);
        let resource = api
            .get_opt(name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("Cluster {}/{}", namespace, name)))?;

        let key = format!("{}/{}/{}", namespace, name, resource.uid().unwrap_or_default());
        if let Some(cluster) = lock(&self.clusters).get(&key) {
            return Ok(Arc::clone(cluster));
        }
        let cluster = Arc::new(Cluster::from_resource(&resource)?);
        lock(&self.clusters).insert(key, Arc::clone(&cluster));
        Ok(cluster)
    }

    /// Build the inquirer for `resource`. Also returns the hypervisor's port
    /// allocations as stored, to detect changes afterwards.
    async fn load_inquirer(
        &self,
        namespace: &str,
        resource: &crds::Component,
    ) -> Result<(ReconcilerInquirer, BTreeMap<u16, PortOwner>), ControllerError> {
        let cluster = self.load_cluster(namespace, &resource.spec.cluster).await?;

        let hypervisors: Api<crds::Hypervisor> = Api::namespaced(self.client.clone(), namespace);
        let hypervisor_resource = hypervisors.get_opt(&resource.spec.hypervisor).await?.ok_or_else(|| {
            ControllerError::NotFound(format!("Hypervisor {}/{}", namespace, resource.spec.hypervisor))
        })?;
        let client = self.hypervisor_client(&hypervisor_resource.spec.endpoint)?;
        let mut hypervisor = Hypervisor::from_resource(&hypervisor_resource, client)?;
        hypervisor.check_health().await?;
        let stored_ports = hypervisor.allocated_ports.clone();

        let components: Api<crds::Component> = Api::namespaced(self.client.clone(), namespace);
        let placed = components.list(&ListParams::default()).await?;
        hypervisor.release_ports_except(&port_owners_on(&hypervisor.name, &placed.items));

        let mut component = Component::from_resource(resource)?;
        component.claim_recorded_ports(&mut hypervisor);

        let inquirer = ReconcilerInquirer::new(component, hypervisor, cluster);
        debug!(
            "Loaded component {} on hypervisor {} ({} ports allocated)",
            inquirer.component().name,
            inquirer.hypervisor().name,
            inquirer.hypervisor().allocated_ports.len()
        );
        Ok((inquirer, stored_ports))
    }

    async fn persist_hypervisor_ports(&self, namespace: &str, hypervisor: &Hypervisor) -> Result<(), ControllerError> {
        let api: Api<crds::Hypervisor> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": hypervisor_status(hypervisor) });
        api.patch_status(&hypervisor.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Persisted {} allocated ports of hypervisor {}", hypervisor.allocated_ports.len(), hypervisor.name);
        Ok(())
    }

    /// Run the pipeline and persist hypervisor ports. Returns the component's
    /// ports when it got far enough to load them.
    async fn run_control_plane(
        &self,
        namespace: &str,
        resource: &crds::Component,
    ) -> (Option<BTreeMap<String, u16>>, Result<(), ControllerError>) {
        let (mut inquirer, stored_ports) = match self.load_inquirer(namespace, resource).await {
            Ok(loaded) => loaded,
            Err(e) => return (None, Err(e)),
        };

        let result = self.control_plane.reconcile(&mut inquirer).await;
        let (component, hypervisor) = inquirer.into_parts();

        // Ports stay allocated whatever the outcome.
        if hypervisor.allocated_ports != stored_ports {
            if let Err(e) = self.persist_hypervisor_ports(namespace, &hypervisor).await {
                error!("Failed to persist ports of hypervisor {}: {}", hypervisor.name, e);
                if result.is_ok() {
                    return (Some(component.allocated_host_ports), Err(e));
                }
            }
        }
        (Some(component.allocated_host_ports), result)
    }

    /// Reconciles a Component resource.
    pub async fn reconcile_component(&self, resource: &crds::Component) -> Result<(), ControllerError> {
        let name = resource.name_any();
        let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());
        let started = Instant::now();
        info!("Reconciling Component {}/{}", namespace, name);

        let hypervisor_lock = self.hypervisor_lock(&format!("{}/{}", namespace, resource.spec.hypervisor));
        let _guard = hypervisor_lock.lock().await;

        let (ports, mut result) = self.run_control_plane(&namespace, resource).await;

        let status = component_status(resource.status.as_ref(), ports, &result, Utc::now());
        if resource.status.as_ref() != Some(&status) {
            let api: Api<crds::Component> = Api::namespaced(self.client.clone(), &namespace);
            let patch = create_component_status_patch(&status);
            if let Err(e) = api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                error!("Failed to update Component {}/{} status: {}", namespace, name, e);
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        match &result {
            Ok(()) => {
                self.backoff.record_success(&format!("Component/{}/{}", namespace, name));
                self.metrics.reconciled("Component", started.elapsed());
                info!("Component {}/{} converged", namespace, name);
            }
            Err(e) => {
                self.metrics.reconcile_failed("Component", e.kind(), started.elapsed());
                error!("Component {}/{} failed ({}): {}", namespace, name, e.kind(), e);
            }
        }
        result
    }

    /// Forget the backoff of a resource after a successful reconciliation
    pub fn reset_backoff(&self, key: &str) {
        self.backoff.record_success(key);
    }
}
