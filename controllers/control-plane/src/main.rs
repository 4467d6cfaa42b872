//! Control Plane Controller
//!
//! Provisions Kubernetes control planes onto hypervisors:
//! - Cluster: generates the cluster PKI once
//! - Component: runs etcd plus kube-apiserver, kube-controller-manager and
//!   kube-scheduler for one control plane instance on its hypervisor
//!
//! Reconciliation is level-triggered: components are re-checked periodically
//! and every step is safe to repeat.

mod backoff;
mod cluster;
mod component;
mod config;
mod controller;
mod error;
mod hypervisor;
mod inquirer;
mod metrics;
mod reconciler;
mod secrets;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Control Plane Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Secrets root: {}", config.reconciler.secrets_root);
    info!("  Store topology: {:?}", config.reconciler.store_topology);
    info!("  Images: {:?}", config.reconciler.images);
    info!("  Resync: {:?}", config.resync);
    info!("  Metrics: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
