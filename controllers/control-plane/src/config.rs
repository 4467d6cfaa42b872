//! Controller configuration.
//!
//! Everything is read from the environment once at startup. `from_lookup`
//! takes the lookup function so parsing can be tested without touching the
//! process environment.

use crate::error::ControllerError;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Default root directory for per-component secrets on hypervisors
pub const DEFAULT_SECRETS_ROOT: &str = "/etc/control-plane/clusters";

const DEFAULT_RESYNC_SECONDS: u64 = 300;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Pinned, mutually compatible image references for one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub etcd: String,
    pub kube_apiserver: String,
    pub kube_controller_manager: String,
    pub kube_scheduler: String,
}

impl Default for ImageSet {
    fn default() -> Self {
        Self {
            etcd: "k8s.gcr.io/etcd:3.4.3-0".to_string(),
            kube_apiserver: "k8s.gcr.io/kube-apiserver:v1.17.0".to_string(),
            kube_controller_manager: "k8s.gcr.io/kube-controller-manager:v1.17.0".to_string(),
            kube_scheduler: "k8s.gcr.io/kube-scheduler:v1.17.0".to_string(),
        }
    }
}

impl ImageSet {
    /// Every image a control plane component needs, store first
    pub fn control_plane(&self) -> Vec<String> {
        vec![
            self.etcd.clone(),
            self.kube_apiserver.clone(),
            self.kube_controller_manager.clone(),
            self.kube_scheduler.clone(),
        ]
    }
}

/// How API servers reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreTopology {
    /// Each API server talks only to the etcd member on its own hypervisor
    #[default]
    LocalOnly,
}

impl StoreTopology {
    /// Value for `--etcd-servers`
    pub fn store_endpoint(self, hypervisor_ip: IpAddr, etcd_client_port: u16) -> String {
        match self {
            Self::LocalOnly => format!("https://{}", SocketAddr::new(hypervisor_ip, etcd_client_port)),
        }
    }
}

impl FromStr for StoreTopology {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-only" => Ok(Self::LocalOnly),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown store topology {:?} (expected \"local-only\")",
                other
            ))),
        }
    }
}

/// Configuration handed to the reconcilers at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub images: ImageSet,
    pub secrets_root: String,
    pub store_topology: StoreTopology,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            images: ImageSet::default(),
            secrets_root: DEFAULT_SECRETS_ROOT.to_string(),
            store_topology: StoreTopology::default(),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; `None` means all namespaces
    pub namespace: Option<String>,
    /// Bearer token for hypervisor agents
    pub hypervisor_token: Option<String>,
    /// Requeue interval after a successful reconciliation
    pub resync: Duration,
    /// Listen address of the metrics and probe server
    pub metrics_addr: SocketAddr,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, treating empty values as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = ImageSet::default();
        let images = ImageSet {
            etcd: get("ETCD_IMAGE").unwrap_or(defaults.etcd),
            kube_apiserver: get("KUBE_APISERVER_IMAGE").unwrap_or(defaults.kube_apiserver),
            kube_controller_manager: get("KUBE_CONTROLLER_MANAGER_IMAGE")
                .unwrap_or(defaults.kube_controller_manager),
            kube_scheduler: get("KUBE_SCHEDULER_IMAGE").unwrap_or(defaults.kube_scheduler),
        };

        let secrets_root = get("SECRETS_ROOT").unwrap_or_else(|| DEFAULT_SECRETS_ROOT.to_string());
        if !secrets_root.starts_with('/') {
            return Err(ControllerError::InvalidConfig(format!(
                "SECRETS_ROOT must be an absolute path, got {:?}",
                secrets_root
            )));
        }

        let store_topology = match get("STORE_TOPOLOGY") {
            Some(value) => value.parse()?,
            None => StoreTopology::default(),
        };

        let resync_seconds = match get("RESYNC_SECONDS") {
            Some(value) => value.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RESYNC_SECONDS {:?}: {}", value, e))
            })?,
            None => DEFAULT_RESYNC_SECONDS,
        };
        if resync_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_SECONDS must be greater than zero".to_string(),
            ));
        }

        let metrics_addr = get("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_ADDR {:?}: {}", metrics_addr, e))
        })?;

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            hypervisor_token: get("HYPERVISOR_TOKEN"),
            resync: Duration::from_secs(resync_seconds),
            metrics_addr,
            reconciler: ReconcilerConfig {
                images,
                secrets_root: secrets_root.trim_end_matches('/').to_string(),
                store_topology,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.hypervisor_token, None);
        assert_eq!(config.resync, Duration::from_secs(300));
        assert_eq!(config.reconciler, ReconcilerConfig::default());
        assert_eq!(config.reconciler.images.etcd, "k8s.gcr.io/etcd:3.4.3-0");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "infra"),
            ("SECRETS_ROOT", "/var/lib/secrets/"),
            ("STORE_TOPOLOGY", "local-only"),
            ("KUBE_APISERVER_IMAGE", "registry.local/kube-apiserver:v1.18.0"),
            ("RESYNC_SECONDS", "60"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("infra"));
        assert_eq!(config.reconciler.secrets_root, "/var/lib/secrets");
        assert_eq!(
            config.reconciler.images.kube_apiserver,
            "registry.local/kube-apiserver:v1.18.0"
        );
        assert_eq!(config.reconciler.images.kube_scheduler, ImageSet::default().kube_scheduler);
        assert_eq!(config.resync, Duration::from_secs(60));
        assert_eq!(config.metrics_addr.port(), 9090);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("STORE_TOPOLOGY", "multi-member")],
            [("RESYNC_SECONDS", "soon")],
            [("RESYNC_SECONDS", "0")],
            [("SECRETS_ROOT", "relative/path")],
            [("METRICS_ADDR", "not-an-address")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert_eq!(err.kind(), "invalid-config", "{:?}", vars);
        }
    }

    #[test]
    fn test_local_only_store_endpoint() {
        let topology = StoreTopology::LocalOnly;
        assert_eq!(
            topology.store_endpoint("10.0.0.5".parse().unwrap(), 32001),
            "https://10.0.0.5:32001"
        );
        assert_eq!(
            topology.store_endpoint("fd00::5".parse().unwrap(), 32001),
            "https://[fd00::5]:32001"
        );
    }
}
