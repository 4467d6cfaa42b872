//! HypervisorClient trait for mocking
//!
//! The concrete HypervisorClient implements this trait, and tests can use
//! mock implementations.

use crate::error::HypervisorError;
use crate::models::{Pod, PodHandle};
use std::collections::BTreeMap;

/// Trait for hypervisor agent operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait HypervisorClientTrait: Send + Sync {
    /// Get the agent base URL
    fn endpoint(&self) -> &str;

    /// Check the agent is reachable
    async fn health(&self) -> Result<(), HypervisorError>;

    /// Make sure every image is present on the hypervisor, pulling as needed
    async fn ensure_images(&self, images: &[String]) -> Result<(), HypervisorError>;

    /// Write every absolute path to its content, overwriting existing files
    async fn upload_files(&self, files: &BTreeMap<String, String>) -> Result<(), HypervisorError>;

    /// Run `pod` for `cluster`, replacing a running pod of the same name when
    /// its specification differs
    async fn run_pod(&self, cluster: &str, pod: &Pod) -> Result<PodHandle, HypervisorError>;
}
