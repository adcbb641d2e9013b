//! Continuous-value-deviation detection.
//!
//! The query yields one scalar per pod where `1.0` is nominal (typically the
//! pod's value divided by the peer average).

use std::sync::Arc;

use chrono::Utc;

use crate::anomaly::{require_metric_source, traffic_receiving_pods, DetectorContext, DetectorError};
use crate::config::ContinuousValueDeviationConfig;
use crate::pod::Pod;
use crate::query::MetricSource;

/// True when `value` is further than `max_deviation_percent` from 1.0.
pub fn deviates(value: f64, max_deviation_percent: f64) -> bool {
    (1.0 - value).abs() > max_deviation_percent / 100.0
}

pub struct ContinuousValueDeviation {
    query: String,
    pod_name_key: String,
    max_deviation_percent: f64,
    context: DetectorContext,
    metrics: Arc<dyn MetricSource>,
}

pub(crate) fn validate(config: &ContinuousValueDeviationConfig) -> Result<(), DetectorError> {
    if config.query.trim().is_empty() {
        return Err(DetectorError::Config("query is required".to_string()));
    }
    if config.pod_name_key.is_empty() {
        return Err(DetectorError::Config("pod name key is required".to_string()));
    }
    if config.max_deviation_percent == 0.0 {
        return Err(DetectorError::Config(
            "max_deviation_percent must be non-zero".to_string(),
        ));
    }
    if !config.max_deviation_percent.is_finite() || config.max_deviation_percent < 0.0 {
        return Err(DetectorError::Config(format!(
            "max_deviation_percent must be positive, got {}",
            config.max_deviation_percent
        )));
    }
    Ok(())
}

impl ContinuousValueDeviation {
    pub fn new(
        config: &ContinuousValueDeviationConfig,
        context: DetectorContext,
    ) -> Result<Self, DetectorError> {
        validate(config)?;
        let metrics = require_metric_source(&context)?;
        Ok(Self {
            query: config.query.clone(),
            pod_name_key: config.pod_name_key.clone(),
            max_deviation_percent: config.max_deviation_percent,
            context,
            metrics,
        })
    }

    pub async fn pods_out_of_bounds(&self) -> Result<Vec<Pod>, DetectorError> {
        let mut receiving = traffic_receiving_pods(&self.context).await?;
        let samples = self.metrics.query(&self.query, Utc::now()).await?;

        let mut violators = Vec::new();
        for sample in samples {
            let Some(name) = sample.label(&self.pod_name_key) else {
                tracing::warn!(labels = ?sample.labels, "Sample without pod label");
                continue;
            };
            if !deviates(sample.value, self.max_deviation_percent) {
                continue;
            }
            match receiving.remove(name) {
                Some(pod) => {
                    tracing::debug!(
                        pod = %pod.key(),
                        value = sample.value,
                        "Pod deviates from peers"
                    );
                    violators.push(pod);
                }
                None => {
                    tracing::debug!(pod = %name, "Deviating pod is not receiving traffic, skipped");
                }
            }
        }
        Ok(violators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::pod::Selector;
    use crate::query::{QueryError, Sample};
    use async_trait::async_trait;
    use chrono::DateTime;

    struct Fixed(Vec<Sample>);

    #[async_trait]
    impl MetricSource for Fixed {
        async fn query(&self, _: &str, _: DateTime<Utc>) -> Result<Vec<Sample>, QueryError> {
            Ok(self.0.clone())
        }
    }

    fn config(max: f64) -> ContinuousValueDeviationConfig {
        ContinuousValueDeviationConfig {
            query: "q".into(),
            pod_name_key: "pod".into(),
            max_deviation_percent: max,
        }
    }

    #[test]
    fn test_deviation_bounds() {
        assert!(!deviates(1.0, 10.0));
        assert!(!deviates(1.05, 10.0));
        assert!(!deviates(0.95, 10.0));
        assert!(deviates(1.2, 10.0));
        assert!(deviates(0.5, 10.0));
    }

    #[test]
    fn test_zero_deviation_rejected() {
        assert!(matches!(validate(&config(0.0)), Err(DetectorError::Config(_))));
        assert!(validate(&config(-5.0)).is_err());
        assert!(validate(&config(25.0)).is_ok());
    }

    #[tokio::test]
    async fn test_flags_deviating_pods() {
        let cluster = Arc::new(MemoryCluster::new());
        for name in ["a", "b", "c"] {
            cluster.insert(Pod::new("shop", name));
        }
        let samples = vec![
            Sample::new([("pod", "a")], 1.01),
            Sample::new([("pod", "b")], 1.8),
            Sample::new([("pod", "c")], 0.3),
            Sample::new([("pod", "ghost")], 4.0),
            Sample::new([("instance", "x")], 9.0),
        ];
        let context = DetectorContext {
            namespace: "shop".into(),
            selector: Selector::new(),
            lister: cluster,
            metrics: Some(Arc::new(Fixed(samples))),
        };

        let detector = ContinuousValueDeviation::new(&config(20.0), context).unwrap();
        let violators = detector.pods_out_of_bounds().await.unwrap();
        let names: Vec<&str> = violators.iter().map(Pod::name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
