//! Custom verdict service.
//!
//! The service answers a GET with a pod list in the cluster API wire shape.
//! The list is trusted as-is: no readiness or traffic filtering is applied.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::anomaly::DetectorError;
use crate::config::CustomServiceConfig;
use crate::pod::{Pod, PodList};

pub struct CustomService {
    http: Client,
    url: Url,
}

pub(crate) fn validate(config: &CustomServiceConfig) -> Result<(), DetectorError> {
    let url: Url = config.url.parse().map_err(|e| {
        DetectorError::Config(format!("invalid verdict URL '{}': {}", config.url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(DetectorError::Config(format!(
            "verdict URL must be http or https, got {}",
            url.scheme()
        )));
    }
    if config.timeout_secs == 0 {
        return Err(DetectorError::Config("verdict timeout must be positive".to_string()));
    }
    Ok(())
}

impl CustomService {
    pub fn new(config: &CustomServiceConfig) -> Result<Self, DetectorError> {
        validate(config)?;
        let url = config
            .url
            .parse()
            .map_err(|e: url::ParseError| DetectorError::Config(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| DetectorError::Config(e.to_string()))?;

        Ok(Self { http, url })
    }

    pub async fn pods_out_of_bounds(&self) -> Result<Vec<Pod>, DetectorError> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| DetectorError::CustomService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::CustomService(format!(
                "{} answered {}",
                self.url, status
            )));
        }

        let list: PodList = response
            .json()
            .await
            .map_err(|e| DetectorError::CustomService(format!("invalid pod list: {}", e)))?;
        Ok(list.items)
    }
}
