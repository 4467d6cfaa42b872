//! Component domain model

use crate::error::ControllerError;
use crate::hypervisor::{Hypervisor, PortOwner};
use std::collections::BTreeMap;
use tracing::warn;

/// One control plane instance of a cluster placed on one hypervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub cluster: String,
    pub hypervisor: String,
    /// Logical port name to host port
    pub allocated_host_ports: BTreeMap<String, u16>,
}

impl Component {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>, hypervisor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            hypervisor: hypervisor.into(),
            allocated_host_ports: BTreeMap::new(),
        }
    }

    pub fn from_resource(resource: &crds::Component) -> Result<Self, ControllerError> {
        let name = resource
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("Component missing name".to_string()))?;
        let mut component = Self::new(name, resource.spec.cluster.clone(), resource.spec.hypervisor.clone());
        if let Some(status) = &resource.status {
            component.allocated_host_ports = status.allocated_host_ports.clone();
        }
        Ok(component)
    }

    /// Who this component is in a hypervisor's port table
    pub fn port_owner(&self) -> PortOwner {
        PortOwner {
            cluster: self.cluster.clone(),
            component: self.name.clone(),
        }
    }

    /// Claim the recorded ports on `hypervisor`. A recorded port the
    /// hypervisor assigns to another component is forgotten so that
    /// `request_port` allocates a new one. Returns the forgotten names.
    pub fn claim_recorded_ports(&mut self, hypervisor: &mut Hypervisor) -> Vec<String> {
        let owner = self.port_owner();
        let mut conflicting = Vec::new();
        for (name, port) in &self.allocated_host_ports {
            if !hypervisor.claim_port(*port, owner.clone()) {
                warn!(
                    "Port {} ({}) of component {} is held by {:?} on hypervisor {}, reallocating",
                    port, name, self.name, hypervisor.allocated_ports.get(port), hypervisor.name
                );
                conflicting.push(name.clone());
            }
        }
        for name in &conflicting {
            self.allocated_host_ports.remove(name);
        }
        conflicting
    }

    /// Host port bound to logical port `name`, reserving one on `hypervisor`
    /// the first time
    pub fn request_port(&mut self, hypervisor: &mut Hypervisor, name: &str) -> Result<u16, ControllerError> {
        if let Some(port) = self.allocated_host_ports.get(name) {
            return Ok(*port);
        }
        let port = hypervisor.request_port(&self.cluster, &self.name)?;
        self.allocated_host_ports.insert(name.to_string(), port);
        Ok(port)
    }
}
