//! Time-series query contract.
//!
//! # Data Flow
//! ```text
//! Anomaly detector
//!     → MetricSource::query(query, now)
//!     → Vec<Sample> (label set + scalar value)
//! ```
//!
//! # Design Decisions
//! - Only instant-vector results are accepted; any other shape is an error
//! - Every query carries a deadline

pub mod prometheus;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use prometheus::PrometheusSource;

/// One labelled sample of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn new<I, K, V>(labels: I, value: f64) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            value,
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Errors that can occur while querying the metric source.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Transport failure.
    #[error("query request failed: {0}")]
    Request(String),

    /// The query exceeded its deadline.
    #[error("query timed out after {0} seconds")]
    Timeout(u64),

    /// The backend rejected the query.
    #[error("query rejected: {0}")]
    Rejected(String),

    /// The result was not an instant vector.
    #[error("unexpected query result shape: {0}")]
    UnexpectedShape(String),
}

/// Point-in-time query backend.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<Vec<Sample>, QueryError>;
}
