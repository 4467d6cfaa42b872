//! Reconciler inquirer.
//!
//! Binds one (component, hypervisor, cluster) triple for the duration of one
//! reconciliation call. Reconcilers read no other state.

use crate::cluster::Cluster;
use crate::component::Component;
use crate::hypervisor::Hypervisor;
use std::sync::Arc;

#[derive(Debug)]
pub struct ReconcilerInquirer {
    component: Component,
    hypervisor: Hypervisor,
    cluster: Arc<Cluster>,
}

impl ReconcilerInquirer {
    pub fn new(component: Component, hypervisor: Hypervisor, cluster: Arc<Cluster>) -> Self {
        Self {
            component,
            hypervisor,
            cluster,
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn hypervisor(&self) -> &Hypervisor {
        &self.hypervisor
    }

    pub fn cluster(&self) -> Arc<Cluster> {
        Arc::clone(&self.cluster)
    }

    /// Mutable access to the component and its hypervisor, for port requests
    pub fn parts_mut(&mut self) -> (&mut Component, &mut Hypervisor) {
        (&mut self.component, &mut self.hypervisor)
    }

    /// The component and hypervisor with every port allocated during the call
    pub fn into_parts(self) -> (Component, Hypervisor) {
        (self.component, self.hypervisor)
    }
}
