//! Component CRD
//!
//! A component is one control plane instance of a cluster, placed on exactly
//! one hypervisor. Placement itself happens elsewhere; the controller only
//! reads `spec` and records allocated ports and reconciliation state.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "controlplane.infra.io",
    version = "v1alpha1",
    kind = "Component",
    namespaced,
    status = "ComponentStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster"}"#,
    printcolumn = r#"{"name":"Hypervisor","type":"string","jsonPath":".spec.hypervisor"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Name of the Cluster this component belongs to (same namespace)
    pub cluster: String,

    /// Name of the Hypervisor this component is placed on (same namespace)
    pub hypervisor: String,

    /// Role of the component
    #[serde(default)]
    pub role: ComponentRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ComponentRole {
    /// etcd, kube-apiserver, kube-controller-manager and kube-scheduler
    #[default]
    ControlPlane,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Logical port name to host port on the hypervisor
    #[serde(default)]
    pub allocated_host_ports: BTreeMap<String, u16>,

    #[serde(default)]
    pub state: ReconcileState,

    /// Kind of the last reconciliation error, e.g. `secret-upload-failure`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Message of the last reconciliation error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the component last transitioned to `Converged`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_converged: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReconcileState {
    #[default]
    Pending,
    Converged,
    Failed,
}
