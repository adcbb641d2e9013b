//! Cluster API-server client.
//!
//! # Responsibilities
//! - List pods by namespace and label selector
//! - Apply label/annotation merge patches guarded by resource version
//! - Delete pods
//!
//! # Design Decisions
//! - Every request carries the configured timeout
//! - HTTP 409 maps to `Conflict` so callers retry on the next tick
//! - The bearer token is read once at construction

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use url::Url;

use crate::cluster::{ClusterError, ClusterResult, PodActuator, PodLister};
use crate::config::ClusterConfig;
use crate::pod::{MetadataPatch, Pod, PodList, Selector};

const MERGE_PATCH: &str = "application/merge-patch+json";

/// HTTP client for the pods resource of the cluster API.
#[derive(Clone)]
pub struct ApiServerClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    timeout_secs: u64,
}

impl ApiServerClient {
    pub fn new(config: &ClusterConfig) -> ClusterResult<Self> {
        let base_url: Url = config.api_url.parse().map_err(|e| {
            ClusterError::Request(format!("invalid API URL '{}': {}", config.api_url, e))
        })?;

        let token = match &config.token_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ClusterError::Request(format!("cannot read token file {}: {}", path, e))
                })?;
                Some(raw.trim().to_string())
            }
            None => None,
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ClusterError::Request(e.to_string()))?;

        tracing::info!(api_url = %base_url, "Cluster API client initialized");

        Ok(Self {
            http,
            base_url,
            token,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn pods_url(&self, namespace: &str) -> ClusterResult<Url> {
        self.base_url
            .join(&format!("api/v1/namespaces/{}/pods", namespace))
            .map_err(|e| ClusterError::Request(e.to_string()))
    }

    fn pod_url(&self, pod: &Pod) -> ClusterResult<Url> {
        self.base_url
            .join(&format!(
                "api/v1/namespaces/{}/pods/{}",
                pod.namespace(),
                pod.name()
            ))
            .map_err(|e| ClusterError::Request(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> ClusterError {
        if e.is_timeout() {
            ClusterError::Timeout(self.timeout_secs)
        } else {
            ClusterError::Request(e.to_string())
        }
    }

    async fn check_status(key: &str, response: Response) -> ClusterResult<Response> {
        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::CONFLICT => Err(ClusterError::Conflict(key.to_string())),
            StatusCode::NOT_FOUND => Err(ClusterError::NotFound(key.to_string())),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(ClusterError::Request(format!("status {}: {}", s, body)))
            }
        }
    }
}

#[async_trait]
impl PodLister for ApiServerClient {
    async fn list(&self, namespace: &str, selector: &Selector) -> ClusterResult<Vec<Pod>> {
        let mut url = self.pods_url(namespace)?;
        let rendered = selector.to_string();
        if !rendered.is_empty() {
            url.query_pairs_mut().append_pair("labelSelector", &rendered);
        }

        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(namespace, response).await?;

        let list: PodList = response
            .json()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        let key = format!("{}/{}", namespace, name);
        let url = self
            .base_url
            .join(&format!("api/v1/namespaces/{}/pods/{}", namespace, name))
            .map_err(|e| ClusterError::Request(e.to_string()))?;

        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = match Self::check_status(&key, response).await {
            Ok(response) => response,
            Err(ClusterError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let pod = response
            .json::<Pod>()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;
        Ok(Some(pod))
    }
}

#[async_trait]
impl PodActuator for ApiServerClient {
    async fn patch(&self, pod: &Pod, patch: &MetadataPatch) -> ClusterResult<Pod> {
        let key = pod.key();
        let body = patch.to_merge_patch(pod.metadata.resource_version.as_deref());

        let response = self
            .authorize(self.http.patch(self.pod_url(pod)?))
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(&key, response).await?;

        response
            .json::<Pod>()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))
    }

    async fn delete(&self, pod: &Pod) -> ClusterResult<()> {
        let key = pod.key();
        let response = self
            .authorize(self.http.delete(self.pod_url(pod)?))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(&key, response).await?;
        Ok(())
    }
}
