//! Prometheus HTTP API client (`/api/v1/query`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::MetricSourceConfig;
use crate::query::{MetricSource, QueryError, Sample};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Metric source backed by a Prometheus-compatible server.
#[derive(Clone)]
pub struct PrometheusSource {
    http: Client,
    query_url: Url,
    timeout_secs: u64,
}

impl PrometheusSource {
    pub fn new(config: &MetricSourceConfig) -> Result<Self, QueryError> {
        let base: Url = config
            .url
            .parse()
            .map_err(|e| QueryError::Request(format!("invalid URL '{}': {}", config.url, e)))?;
        let query_url = base
            .join("api/v1/query")
            .map_err(|e| QueryError::Request(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QueryError::Request(e.to_string()))?;

        Ok(Self {
            http,
            query_url,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl MetricSource for PrometheusSource {
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<Vec<Sample>, QueryError> {
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);

        let response = self
            .http
            .get(self.query_url.clone())
            .query(&[("query", query), ("time", time.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueryError::Timeout(self.timeout_secs)
                } else {
                    QueryError::Request(e.to_string())
                }
            })?;

        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Request(e.to_string()))?;
        decode_vector(&body)
    }
}

/// Decode an instant-vector response body.
pub fn decode_vector(body: &str) -> Result<Vec<Sample>, QueryError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| QueryError::UnexpectedShape(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Rejected(
            response.error.unwrap_or_else(|| response.status.clone()),
        ));
    }

    let data = response
        .data
        .ok_or_else(|| QueryError::UnexpectedShape("missing data".to_string()))?;
    if data.result_type != "vector" {
        return Err(QueryError::UnexpectedShape(format!(
            "expected vector, got {}",
            data.result_type
        )));
    }

    let raw: Vec<VectorSample> = serde_json::from_value(data.result)
        .map_err(|e| QueryError::UnexpectedShape(e.to_string()))?;

    raw.into_iter()
        .map(|s| {
            let value = s.value.1.parse::<f64>().map_err(|_| {
                QueryError::UnexpectedShape(format!("non-numeric sample value '{}'", s.value.1))
            })?;
            Ok(Sample {
                labels: s.metric,
                value,
            })
        })
        .collect()
}
