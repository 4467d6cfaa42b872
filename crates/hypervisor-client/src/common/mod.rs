//! Common utilities for the hypervisor agent client
//!
//! Request plumbing shared by every agent operation.

use crate::error::HypervisorError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// HTTP client wrapper with optional bearer authentication
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and turn non-success statuses into errors
    async fn send(&self, method: &str, path: &str, request: RequestBuilder) -> Result<Response, HypervisorError> {
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                HypervisorError::Authentication(format!("{} {}: {} - {}", method, path, status, body))
            }
            StatusCode::NOT_FOUND => {
                HypervisorError::NotFound(format!("{} {}: {}", method, path, body))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                HypervisorError::InvalidRequest(format!("{} {}: {}", method, path, body))
            }
            _ => HypervisorError::Api(format!("{} {} failed: {} - {}", method, path, status, body)),
        })
    }

    /// Make a GET request, discarding the body
    pub async fn get_ok(&self, path: &str) -> Result<(), HypervisorError> {
        let url = self.build_url(path);
        debug!("GET {}", url);
        self.send("GET", path, self.client.get(&url)).await?;
        Ok(())
    }

    /// Make a POST request with a JSON body, discarding the response body
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), HypervisorError> {
        let url = self.build_url(path);
        debug!("POST {}", url);
        self.send("POST", path, self.client.post(&url).json(body)).await?;
        Ok(())
    }

    /// Make a PUT request with a JSON body, discarding the response body
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), HypervisorError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);
        self.send("PUT", path, self.client.put(&url).json(body)).await?;
        Ok(())
    }

    /// Make a PUT request with a JSON body and decode the JSON response
    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, HypervisorError> {
        let url = self.build_url(path);
        debug!("PUT {}", url);
        let response = self.send("PUT", path, self.client.put(&url).json(body)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            HypervisorError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }
}
