//! Prints the CRD manifests as a YAML stream.
//!
//! `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use anyhow::Context;
use crds::{Cluster, Component, Hypervisor};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [Cluster::crd(), Component::crd(), Hypervisor::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("serializing {}", name))?;
        print!("---\n{}", yaml);
    }
    Ok(())
}
