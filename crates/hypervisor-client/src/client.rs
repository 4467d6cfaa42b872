//! Hypervisor agent REST client
//!
//! Talks to the agent's `/v1` API: `POST /v1/images/ensure`, `PUT /v1/files`
//! and `PUT /v1/clusters/{cluster}/pods/{pod}`.

use crate::common::HttpClient;
use crate::error::HypervisorError;
use crate::hypervisor_trait::HypervisorClientTrait;
use crate::models::*;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Hypervisor agent client
#[derive(Debug, Clone)]
pub struct HypervisorClient {
    http: HttpClient,
}

impl HypervisorClient {
    /// Create a new hypervisor client
    ///
    /// # Arguments
    /// * `endpoint` - Agent base URL (e.g., "https://10.0.0.5:9443")
    /// * `token` - Optional bearer token sent with every request
    pub fn new(endpoint: String, token: Option<String>) -> Result<Self, HypervisorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, endpoint, token),
        })
    }

    fn pod_path(cluster: &str, pod: &str) -> String {
        format!(
            "/v1/clusters/{}/pods/{}",
            urlencoding::encode(cluster),
            urlencoding::encode(pod)
        )
    }
}

#[async_trait::async_trait]
impl HypervisorClientTrait for HypervisorClient {
    fn endpoint(&self) -> &str {
        self.http.base_url()
    }

    async fn health(&self) -> Result<(), HypervisorError> {
        self.http.get_ok("/healthz").await
    }

    async fn ensure_images(&self, images: &[String]) -> Result<(), HypervisorError> {
        debug!("Ensuring {} images on {}", images.len(), self.endpoint());
        let body = EnsureImagesRequest {
            images: images.to_vec(),
        };
        self.http.post("/v1/images/ensure", &body).await
    }

    async fn upload_files(&self, files: &BTreeMap<String, String>) -> Result<(), HypervisorError> {
        if let Some(path) = files.keys().find(|p| !p.starts_with('/')) {
            return Err(HypervisorError::InvalidRequest(format!(
                "file path must be absolute: {}",
                path
            )));
        }
        debug!("Uploading {} files to {}", files.len(), self.endpoint());
        let body = UploadFilesRequest {
            files: files.clone(),
        };
        self.http.put("/v1/files", &body).await
    }

    async fn run_pod(&self, cluster: &str, pod: &Pod) -> Result<PodHandle, HypervisorError> {
        debug!("Running pod {}/{} on {}", cluster, pod.name, self.endpoint());
        self.http.put_json(&Self::pod_path(cluster, &pod.name), pod).await
    }
}
