//! Discrete-value-out-of-list detection.
//!
//! Each sample carries a pod name and a discriminating value (an HTTP code,
//! say) and counts as activity. Per pod, samples whose value is acceptable
//! add to `ok`, the others to `ko`. A pod is flagged when
//! `ok + ko >= minimum_activity_count` and `ko * 100 / (ok + ko) > tolerance_percent`
//! in integer arithmetic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::anomaly::{require_metric_source, traffic_receiving_pods, DetectorContext, DetectorError};
use crate::config::DiscreteValueOutOfListConfig;
use crate::pod::Pod;
use crate::query::{MetricSource, Sample};

/// Decides whether a discriminating value is acceptable.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueClassifier {
    /// Only listed values are acceptable.
    Good(HashSet<String>),
    /// Every value except the listed ones is acceptable.
    Bad(HashSet<String>),
}

impl ValueClassifier {
    pub fn is_ok(&self, value: &str) -> bool {
        match self {
            ValueClassifier::Good(values) => values.contains(value),
            ValueClassifier::Bad(values) => !values.contains(value),
        }
    }
}

/// Per-pod activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub ok: u64,
    pub ko: u64,
}

impl Activity {
    pub fn total(&self) -> u64 {
        self.ok.saturating_add(self.ko)
    }

    /// Threshold check with floor division.
    pub fn is_out_of_bounds(&self, minimum_activity_count: u64, tolerance_percent: u64) -> bool {
        let total = self.total();
        if total == 0 || total < minimum_activity_count {
            return false;
        }
        self.ko.saturating_mul(100) / total > tolerance_percent
    }
}

pub struct DiscreteValueOutOfList {
    query: String,
    key: String,
    pod_name_key: String,
    classifier: ValueClassifier,
    minimum_activity_count: u64,
    tolerance_percent: u64,
    context: DetectorContext,
    metrics: Arc<dyn MetricSource>,
}

fn non_empty(values: &Option<Vec<String>>) -> Option<&Vec<String>> {
    values.as_ref().filter(|v| !v.is_empty())
}

pub(crate) fn validate(config: &DiscreteValueOutOfListConfig) -> Result<(), DetectorError> {
    if config.query.trim().is_empty() {
        return Err(DetectorError::Config("query is required".to_string()));
    }
    if config.key.is_empty() {
        return Err(DetectorError::Config("discriminating key is required".to_string()));
    }
    if config.pod_name_key.is_empty() {
        return Err(DetectorError::Config("pod name key is required".to_string()));
    }
    match (non_empty(&config.good_values), non_empty(&config.bad_values)) {
        (Some(_), Some(_)) => Err(DetectorError::Config(
            "good_values and bad_values are mutually exclusive".to_string(),
        )),
        (None, None) => Err(DetectorError::Config(
            "one of good_values or bad_values is required".to_string(),
        )),
        _ => Ok(()),
    }
}

impl DiscreteValueOutOfList {
    pub fn new(
        config: &DiscreteValueOutOfListConfig,
        context: DetectorContext,
    ) -> Result<Self, DetectorError> {
        validate(config)?;
        let metrics = require_metric_source(&context)?;

        let classifier = match (non_empty(&config.good_values), non_empty(&config.bad_values)) {
            (Some(good), None) => ValueClassifier::Good(good.iter().cloned().collect()),
            (None, Some(bad)) => ValueClassifier::Bad(bad.iter().cloned().collect()),
            _ => return Err(DetectorError::Config("ambiguous value lists".to_string())),
        };

        Ok(Self {
            query: config.query.clone(),
            key: config.key.clone(),
            pod_name_key: config.pod_name_key.clone(),
            classifier,
            minimum_activity_count: config.minimum_activity_count,
            tolerance_percent: config.tolerance_percent,
            context,
            metrics,
        })
    }

    /// Fold samples into per-pod activity. Samples lacking either label are skipped.
    pub fn aggregate(&self, samples: &[Sample]) -> BTreeMap<String, Activity> {
        let mut counters: BTreeMap<String, Activity> = BTreeMap::new();
        for sample in samples {
            let (Some(pod), Some(value)) =
                (sample.label(&self.pod_name_key), sample.label(&self.key))
            else {
                tracing::warn!(
                    labels = ?sample.labels,
                    "Sample without pod or discriminating label"
                );
                continue;
            };
            let count = sample.value as u64;
            let entry = counters.entry(pod.to_string()).or_default();
            if self.classifier.is_ok(value) {
                entry.ok = entry.ok.saturating_add(count);
            } else {
                entry.ko = entry.ko.saturating_add(count);
            }
        }
        counters
    }

    pub async fn pods_out_of_bounds(&self) -> Result<Vec<Pod>, DetectorError> {
        let mut receiving = traffic_receiving_pods(&self.context).await?;
        let samples = self.metrics.query(&self.query, Utc::now()).await?;

        let mut violators = Vec::new();
        for (name, activity) in self.aggregate(&samples) {
            if !activity.is_out_of_bounds(self.minimum_activity_count, self.tolerance_percent) {
                continue;
            }
            match receiving.remove(&name) {
                Some(pod) => {
                    tracing::debug!(
                        pod = %pod.key(),
                        ok = activity.ok,
                        ko = activity.ko,
                        "Pod out of bounds"
                    );
                    violators.push(pod);
                }
                None => {
                    tracing::debug!(
                        namespace = %self.context.namespace,
                        pod = %name,
                        "Out-of-bounds pod is not receiving traffic, skipped"
                    );
                }
            }
        }
        Ok(violators)
    }
}
