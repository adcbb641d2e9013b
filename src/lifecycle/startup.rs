//! Startup: build the collaborators every component shares.

use std::sync::Arc;

use thiserror::Error;

use crate::cluster::{ApiServerClient, ClusterError, ConfigRegistry};
use crate::config::ControllerConfig;
use crate::query::{PrometheusSource, QueryError};
use crate::supervisor::Collaborators;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cluster client: {0}")]
    Cluster(#[from] ClusterError),

    #[error("metric source: {0}")]
    MetricSource(#[from] QueryError),
}

/// Build the API-server client, metric source and registry from `config`.
///
/// The metric source is always built so a reload can add metric-based
/// strategies; constructing it performs no I/O.
pub fn build_collaborators(config: &ControllerConfig) -> Result<Collaborators, StartupError> {
    let cluster = Arc::new(ApiServerClient::new(&config.cluster)?);
    let metric_source = Arc::new(PrometheusSource::new(&config.metric_source)?);
    tracing::info!(url = %config.metric_source.url, "Using metric source");

    Ok(Collaborators {
        lister: cluster.clone(),
        actuator: cluster,
        registry: Arc::new(ConfigRegistry::from_config(config)),
        metric_source: Some(metric_source),
    })
}

/// Whether moving from `current` to `next` requires new collaborators.
pub fn collaborators_changed(current: &ControllerConfig, next: &ControllerConfig) -> bool {
    current.cluster != next.cluster || current.metric_source != next.metric_source
}
