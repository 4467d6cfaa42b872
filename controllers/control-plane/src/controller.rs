//! Main controller implementation.
//!
//! Wires the Kubernetes client, the reconcilers, the watchers and the metrics
//! server together and runs them until one of them stops.

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::reconciler::control_plane::ControlPlaneReconciler;
use crate::reconciler::etcd::EtcdReconciler;
use crate::watcher::Watcher;
use crds::{Cluster, Component};
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for control plane components.
pub struct Controller {
    component_watcher: JoinHandle<Result<(), ControllerError>>,
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Control Plane Controller");

        let kube_client = Client::try_default().await?;
        let metrics = Metrics::new()?;

        let store = Arc::new(EtcdReconciler::new(config.reconciler.clone()));
        let control_plane = ControlPlaneReconciler::new(config.reconciler.clone(), store);
        let reconciler = Arc::new(Reconciler::new(
            kube_client.clone(),
            control_plane,
            config.hypervisor_token.clone(),
            config.resync,
            metrics.clone(),
        ));

        let namespace = config.namespace.as_deref();
        let component_api: Api<Component> = api(kube_client.clone(), namespace);
        let cluster_api: Api<Cluster> = api(kube_client, namespace);
        let watcher = Arc::new(Watcher::new(reconciler, component_api, cluster_api));

        let component_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_components().await })
        };
        let cluster_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_clusters().await })
        };

        let ready = Arc::new(AtomicBool::new(false));
        let metrics_server = tokio::spawn(metrics::serve(
            config.metrics_addr,
            metrics::router(metrics, Arc::clone(&ready)),
        ));
        ready.store(true, Ordering::Relaxed);

        Ok(Self {
            component_watcher,
            cluster_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Control Plane Controller running");

        tokio::select! {
            result = &mut self.component_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Component watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Component watcher error: {}", e)))?;
            }
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Cluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Cluster watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
