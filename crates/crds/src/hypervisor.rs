//! Hypervisor CRD
//!
//! An execution host able to pull images, receive files and run pods. The
//! status tracks which host ports of `portRange` are handed out to which
//! component.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "controlplane.infra.io",
    version = "v1alpha1",
    kind = "Hypervisor",
    namespaced,
    status = "HypervisorStatus",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.ipAddress"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorSpec {
    /// Address other components use to reach ports exposed on this hypervisor
    pub ip_address: String,

    /// Base URL of the hypervisor agent API (e.g. "https://10.0.0.5:9443")
    pub endpoint: String,

    /// Host ports available for allocation
    pub port_range: PortRange,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorStatus {
    #[serde(default)]
    pub allocated_ports: Vec<AllocatedPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedPort {
    pub port: u16,
    pub cluster: String,
    pub component: String,
}
