//! Control plane CRD Definitions
//!
//! Kubernetes Custom Resource Definitions read by the control plane controller.

pub mod cluster;
pub mod component;
pub mod hypervisor;

pub use cluster::*;
pub use component::*;
pub use hypervisor::*;
