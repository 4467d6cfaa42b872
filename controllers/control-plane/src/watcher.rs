//! Kubernetes resource watchers.
//!
//! Both watchers run on `kube_runtime::Controller`, which reconnects on its
//! own and never runs two reconciliations of the same object at once.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Cluster, Component};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff key of a resource
fn resource_key<K: kube::Resource>(resource_name: &str, obj: &K) -> String {
    format!(
        "{}/{}/{}",
        resource_name,
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any()
    )
}

/// Runs `reconcile_fn` for every change of `K` until the stream ends.
///
/// Failures are requeued with the per-resource Fibonacci backoff; the
/// reconcile function decides the requeue on success.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(resource_name, &*obj);
        error!("Reconciliation error for {}: {}", key, error);
        Action::requeue(ctx.backoff_for_failure(&key))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    // Debounce batches bursts of events (our own status patches included).
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    component_api: Api<Component>,
    cluster_api: Api<Cluster>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, component_api: Api<Component>, cluster_api: Api<Cluster>) -> Self {
        Self {
            reconciler,
            component_api,
            cluster_api,
        }
    }

    /// Watches Component resources; converged components are re-checked
    /// after the resync interval.
    pub async fn watch_components(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.component_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| {
                Box::pin(async move {
                    reconciler.reconcile_component(&resource).await?;
                    Ok(Action::requeue(reconciler.resync()))
                })
            },
            "Component",
        )
        .await
    }

    /// Watches Cluster resources.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.cluster_api.clone(),
            Arc::clone(&self.reconciler),
            |reconciler, resource| {
                Box::pin(async move {
                    reconciler.reconcile_cluster(&resource).await?;
                    reconciler.reset_backoff(&resource_key("Cluster", &*resource));
                    Ok(Action::await_change())
                })
            },
            "Cluster",
        )
        .await
    }
}
