//! Anomaly detection.
//!
//! # Data Flow
//! ```text
//! Breaker tick
//!     → AnomalyDetector::pods_out_of_bounds()
//!         DiscreteValueOutOfList:   list pods → query → (ok, ko) per pod → ratio check
//!         ContinuousValueDeviation: list pods → query → |1 - value| check
//!         CustomService:            GET verdict URL → pod list as-is
//!     → violators
//! ```
//!
//! # Design Decisions
//! - Variants form a closed enum; configuration is validated once, in `new`
//! - Pods already cut or paused are never reported again
//! - Not-ready pods are ignored: their metrics are not meaningful
//! - Query and listing failures abort only the current evaluation

pub mod continuous;
pub mod custom;
pub mod discrete;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::cluster::{ClusterError, PodLister};
use crate::config::DetectorConfig;
use crate::pod::{Pod, Selector, TrafficState};
use crate::query::{MetricSource, QueryError};

pub use continuous::ContinuousValueDeviation;
pub use custom::CustomService;
pub use discrete::DiscreteValueOutOfList;

/// Errors raised while building or running a detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Contradictory or incomplete configuration.
    #[error("invalid detector configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The custom verdict endpoint failed or answered garbage.
    #[error("custom verdict service failed: {0}")]
    CustomService(String),
}

/// Collaborators and scope shared by every detector variant.
#[derive(Clone)]
pub struct DetectorContext {
    pub namespace: String,
    pub selector: Selector,
    pub lister: Arc<dyn PodLister>,
    pub metrics: Option<Arc<dyn MetricSource>>,
}

/// A validated anomaly detector.
pub enum AnomalyDetector {
    DiscreteValueOutOfList(DiscreteValueOutOfList),
    ContinuousValueDeviation(ContinuousValueDeviation),
    CustomService(CustomService),
}

impl AnomalyDetector {
    /// Validate `config` and build the matching variant.
    pub fn new(config: &DetectorConfig, context: DetectorContext) -> Result<Self, DetectorError> {
        validate(config)?;
        let detector = match config {
            DetectorConfig::DiscreteValueOutOfList(c) => {
                Self::DiscreteValueOutOfList(DiscreteValueOutOfList::new(c, context)?)
            }
            DetectorConfig::ContinuousValueDeviation(c) => {
                Self::ContinuousValueDeviation(ContinuousValueDeviation::new(c, context)?)
            }
            DetectorConfig::CustomService(c) => Self::CustomService(CustomService::new(c)?),
        };
        Ok(detector)
    }

    /// Pods currently out of bounds.
    pub async fn pods_out_of_bounds(&self) -> Result<Vec<Pod>, DetectorError> {
        match self {
            Self::DiscreteValueOutOfList(d) => d.pods_out_of_bounds().await,
            Self::ContinuousValueDeviation(d) => d.pods_out_of_bounds().await,
            Self::CustomService(d) => d.pods_out_of_bounds().await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DiscreteValueOutOfList(_) => "discrete_value_out_of_list",
            Self::ContinuousValueDeviation(_) => "continuous_value_deviation",
            Self::CustomService(_) => "custom_service",
        }
    }
}

/// Static checks on a detector configuration.
pub fn validate(config: &DetectorConfig) -> Result<(), DetectorError> {
    match config {
        DetectorConfig::DiscreteValueOutOfList(c) => discrete::validate(c),
        DetectorConfig::ContinuousValueDeviation(c) => continuous::validate(c),
        DetectorConfig::CustomService(c) => custom::validate(c),
    }
}

fn require_metric_source(
    context: &DetectorContext,
) -> Result<Arc<dyn MetricSource>, DetectorError> {
    context
        .metrics
        .clone()
        .ok_or_else(|| DetectorError::Config("a metric source is required".to_string()))
}

/// Ready pods of the scope that currently receive traffic, keyed by name.
///
/// Cut or paused pods are logged and left out.
pub(crate) async fn traffic_receiving_pods(
    context: &DetectorContext,
) -> Result<BTreeMap<String, Pod>, DetectorError> {
    let pods = context.lister.list(&context.namespace, &context.selector).await?;

    let mut receiving = BTreeMap::new();
    for pod in pods {
        if !pod.is_ready() {
            tracing::debug!(pod = %pod.key(), "Ignoring pod that is not ready");
            continue;
        }
        match pod.traffic() {
            Some(TrafficState::No) | Some(TrafficState::Pause) => {
                tracing::debug!(
                    pod = %pod.key(),
                    traffic = ?pod.traffic(),
                    "Pod already excluded from traffic, not evaluated"
                );
            }
            _ => {
                receiving.insert(pod.name().to_string(), pod);
            }
        }
    }
    Ok(receiving)
}
