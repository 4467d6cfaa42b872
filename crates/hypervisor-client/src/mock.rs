//! Mock HypervisorClient for unit testing
//!
//! This module provides a mock implementation of HypervisorClientTrait that
//! behaves like an idempotent agent without requiring a running hypervisor.

use crate::error::HypervisorError;
use crate::hypervisor_trait::HypervisorClientTrait;
use crate::models::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockState {
    images: BTreeSet<String>,
    files: BTreeMap<String, String>,
    pods: BTreeMap<(String, String), Pod>,
    uploads: Vec<BTreeMap<String, String>>,
    health_calls: usize,
    ensure_images_calls: usize,
    run_pod_calls: usize,
    pod_replacements: usize,
    fail_health: Option<String>,
    fail_ensure_images: Option<String>,
    fail_upload_files: Option<String>,
    fail_run_pod: Option<String>,
}

/// Mock HypervisorClient for testing
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockHypervisorClient {
    endpoint: String,
    state: Arc<Mutex<MockState>>,
}

impl MockHypervisorClient {
    /// Create a new mock client
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the agent unreachable for `health`
    pub fn fail_health(&self, message: impl Into<String>) {
        self.state().fail_health = Some(message.into());
    }

    /// Make every `ensure_images` call fail with `message`
    pub fn fail_ensure_images(&self, message: impl Into<String>) {
        self.state().fail_ensure_images = Some(message.into());
    }

    /// Make every `upload_files` call fail with `message`
    pub fn fail_upload_files(&self, message: impl Into<String>) {
        self.state().fail_upload_files = Some(message.into());
    }

    /// Make every `run_pod` call fail with `message`
    pub fn fail_run_pod(&self, message: impl Into<String>) {
        self.state().fail_run_pod = Some(message.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_health = None;
        state.fail_ensure_images = None;
        state.fail_upload_files = None;
        state.fail_run_pod = None;
    }

    /// Images present on the mock hypervisor
    pub fn images(&self) -> BTreeSet<String> {
        self.state().images.clone()
    }

    /// Current content of every uploaded file
    pub fn files(&self) -> BTreeMap<String, String> {
        self.state().files.clone()
    }

    /// Each `upload_files` batch in call order
    pub fn uploads(&self) -> Vec<BTreeMap<String, String>> {
        self.state().uploads.clone()
    }

    /// Pod currently running for `cluster` under `name`
    pub fn pod(&self, cluster: &str, name: &str) -> Option<Pod> {
        self.state()
            .pods
            .get(&(cluster.to_string(), name.to_string()))
            .cloned()
    }

    pub fn health_calls(&self) -> usize {
        self.state().health_calls
    }

    pub fn ensure_images_calls(&self) -> usize {
        self.state().ensure_images_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.state().uploads.len()
    }

    pub fn run_pod_calls(&self) -> usize {
        self.state().run_pod_calls
    }

    /// Number of times a running pod was replaced by a different specification
    pub fn pod_replacements(&self) -> usize {
        self.state().pod_replacements
    }
}

#[async_trait::async_trait]
impl HypervisorClientTrait for MockHypervisorClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health(&self) -> Result<(), HypervisorError> {
        let mut state = self.state();
        state.health_calls += 1;
        match &state.fail_health {
            Some(message) => Err(HypervisorError::Api(message.clone())),
            None => Ok(()),
        }
    }

    async fn ensure_images(&self, images: &[String]) -> Result<(), HypervisorError> {
        let mut state = self.state();
        state.ensure_images_calls += 1;
        if let Some(message) = &state.fail_ensure_images {
            return Err(HypervisorError::NotFound(message.clone()));
        }
        state.images.extend(images.iter().cloned());
        Ok(())
    }

    async fn upload_files(&self, files: &BTreeMap<String, String>) -> Result<(), HypervisorError> {
        let mut state = self.state();
        if let Some(message) = &state.fail_upload_files {
            return Err(HypervisorError::Api(message.clone()));
        }
        state.uploads.push(files.clone());
        state
            .files
            .extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn run_pod(&self, cluster: &str, pod: &Pod) -> Result<PodHandle, HypervisorError> {
        let mut state = self.state();
        state.run_pod_calls += 1;
        if let Some(message) = &state.fail_run_pod {
            return Err(HypervisorError::Api(message.clone()));
        }
        let key = (cluster.to_string(), pod.name.clone());
        match state.pods.get(&key) {
            Some(running) if running == pod => {}
            Some(_) => {
                state.pod_replacements += 1;
                state.pods.insert(key, pod.clone());
            }
            None => {
                state.pods.insert(key, pod.clone());
            }
        }
        Ok(PodHandle {
            id: format!("{}/{}", cluster, pod.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(image: &str) -> Pod {
        Pod::new(
            "etcd-demo",
            vec![Container::new("etcd", image)],
            BTreeMap::new(),
            Privileges::Unprivileged,
        )
    }

    #[tokio::test]
    async fn test_run_pod_replaces_only_on_change() {
        let mock = MockHypervisorClient::new("mock://hv");
        mock.run_pod("demo", &pod("etcd:1")).await.unwrap();
        mock.run_pod("demo", &pod("etcd:1")).await.unwrap();
        assert_eq!(mock.pod_replacements(), 0);

        mock.run_pod("demo", &pod("etcd:2")).await.unwrap();
        assert_eq!(mock.pod_replacements(), 1);
        assert_eq!(mock.run_pod_calls(), 3);
        assert_eq!(mock.pod("demo", "etcd-demo").unwrap().containers[0].image, "etcd:2");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = MockHypervisorClient::new("mock://hv");
        mock.fail_ensure_images("no such image");
        assert!(mock.ensure_images(&["x".to_string()]).await.is_err());
        assert!(mock.images().is_empty());

        mock.clear_failures();
        mock.ensure_images(&["x".to_string()]).await.unwrap();
        assert!(mock.images().contains("x"));
        assert_eq!(mock.ensure_images_calls(), 2);
    }
}
