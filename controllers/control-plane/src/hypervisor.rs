//! Hypervisor domain model.
//!
//! Wraps the agent client with the error kinds of the reconciliation steps
//! and owns the hypervisor's host port space.

use crate::error::ControllerError;
use hypervisor_client::{HypervisorClientTrait, Pod, PodHandle};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info};

/// Who holds a host port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortOwner {
    pub cluster: String,
    pub component: String,
}

/// An execution host that runs pods for components
pub struct Hypervisor {
    pub name: String,
    pub ip_address: IpAddr,
    pub port_range: RangeInclusive<u16>,
    pub allocated_ports: BTreeMap<u16, PortOwner>,
    client: Arc<dyn HypervisorClientTrait>,
}

impl fmt::Debug for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypervisor")
            .field("name", &self.name)
            .field("ip_address", &self.ip_address)
            .field("port_range", &self.port_range)
            .field("allocated_ports", &self.allocated_ports)
            .field("endpoint", &self.client.endpoint())
            .finish()
    }
}

impl Hypervisor {
    pub fn new(
        name: impl Into<String>,
        ip_address: IpAddr,
        port_range: RangeInclusive<u16>,
        client: Arc<dyn HypervisorClientTrait>,
    ) -> Self {
        Self {
            name: name.into(),
            ip_address,
            port_range,
            allocated_ports: BTreeMap::new(),
            client,
        }
    }

    pub fn from_resource(
        resource: &crds::Hypervisor,
        client: Arc<dyn HypervisorClientTrait>,
    ) -> Result<Self, ControllerError> {
        let name = resource
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("Hypervisor missing name".to_string()))?;
        let ip_address = resource.spec.ip_address.parse::<IpAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "Hypervisor {} has invalid ipAddress {:?}: {}",
                name, resource.spec.ip_address, e
            ))
        })?;
        let range = resource.spec.port_range;
        if range.low > range.high {
            return Err(ControllerError::InvalidConfig(format!(
                "Hypervisor {} has empty port range {}-{}",
                name, range.low, range.high
            )));
        }

        let mut hypervisor = Self::new(name, ip_address, range.low..=range.high, client);
        if let Some(status) = &resource.status {
            for allocated in &status.allocated_ports {
                hypervisor.claim_port(
                    allocated.port,
                    PortOwner {
                        cluster: allocated.cluster.clone(),
                        component: allocated.component.clone(),
                    },
                );
            }
        }
        Ok(hypervisor)
    }

    /// Record a port already held by `owner`. Returns false when the port
    /// belongs to someone else.
    pub fn claim_port(&mut self, port: u16, owner: PortOwner) -> bool {
        *self.allocated_ports.entry(port).or_insert_with(|| owner.clone()) == owner
    }

    /// Free every port whose owner is not in `live`. Returns the freed ports.
    pub fn release_ports_except(&mut self, live: &BTreeSet<PortOwner>) -> Vec<u16> {
        let released: Vec<u16> = self
            .allocated_ports
            .iter()
            .filter(|(_, owner)| !live.contains(*owner))
            .map(|(port, _)| *port)
            .collect();
        for port in &released {
            if let Some(owner) = self.allocated_ports.remove(port) {
                info!(
                    "Released port {} on hypervisor {} held by removed component {}/{}",
                    port, self.name, owner.cluster, owner.component
                );
            }
        }
        released
    }

    /// Reserve the lowest free port in range for a component
    pub fn request_port(&mut self, cluster: &str, component: &str) -> Result<u16, ControllerError> {
        let port = self
            .port_range
            .clone()
            .find(|port| !self.allocated_ports.contains_key(port))
            .ok_or_else(|| {
                ControllerError::PortAllocation(format!(
                    "no free port in {}-{} on hypervisor {}",
                    self.port_range.start(),
                    self.port_range.end(),
                    self.name
                ))
            })?;
        debug!("Reserved port {} on hypervisor {} for {}/{}", port, self.name, cluster, component);
        self.allocated_ports.insert(
            port,
            PortOwner {
                cluster: cluster.to_string(),
                component: component.to_string(),
            },
        );
        Ok(port)
    }

    pub async fn check_health(&self) -> Result<(), ControllerError> {
        self.client
            .health()
            .await
            .map_err(ControllerError::HypervisorUnreachable)
    }

    pub async fn ensure_images(&self, images: &[String]) -> Result<(), ControllerError> {
        self.client
            .ensure_images(images)
            .await
            .map_err(ControllerError::ImageUnavailable)
    }

    pub async fn upload_files(&self, files: &BTreeMap<String, String>) -> Result<(), ControllerError> {
        self.client
            .upload_files(files)
            .await
            .map_err(ControllerError::SecretUpload)
    }

    pub async fn run_pod(&self, cluster: &str, pod: &Pod) -> Result<PodHandle, ControllerError> {
        self.client
            .run_pod(cluster, pod)
            .await
            .map_err(ControllerError::PodPlacement)
    }
}
