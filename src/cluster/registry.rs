//! Strategy registry derived from the loaded configuration.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::cluster::{ClusterResult, StrategyRegistry};
use crate::config::ControllerConfig;

type Snapshot = HashMap<String, BTreeSet<String>>;

/// Namespace → strategy names, swapped atomically on reload.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    inner: ArcSwap<Snapshot>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        let registry = Self::new();
        registry.replace(config);
        registry
    }

    /// Replace the whole registry with the strategies of `config`.
    pub fn replace(&self, config: &ControllerConfig) {
        let mut snapshot = Snapshot::new();
        for service in &config.services {
            let names = snapshot.entry(service.namespace.clone()).or_default();
            for strategy in &service.strategies {
                names.insert(strategy.name.clone());
            }
        }
        self.inner.store(Arc::new(snapshot));
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, namespace: &str, name: &str) -> bool {
        self.inner
            .load()
            .get(namespace)
            .is_some_and(|names| names.contains(name))
    }
}

#[async_trait]
impl StrategyRegistry for ConfigRegistry {
    async fn list(&self, namespace: &str) -> ClusterResult<Vec<String>> {
        Ok(self
            .inner
            .load()
            .get(namespace)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerStrategyConfig, CustomServiceConfig, DetectorConfig, ServiceConfig};

    fn service(namespace: &str, strategies: &[&str]) -> ServiceConfig {
        ServiceConfig {
            name: format!("{}-svc", namespace),
            namespace: namespace.to_string(),
            selector: Default::default(),
            strategies: strategies
                .iter()
                .map(|name| BreakerStrategyConfig {
                    name: name.to_string(),
                    evaluation_period_secs: 10,
                    min_available_count: 0,
                    min_available_ratio: 0,
                    detector: DetectorConfig::CustomService(CustomServiceConfig {
                        url: "http://127.0.0.1:9/pods".to_string(),
                        timeout_secs: 1,
                    }),
                    activator: None,
                })
                .collect(),
            default_activator: Default::default(),
            gc: Default::default(),
        }
    }

    fn config(services: Vec<ServiceConfig>) -> ControllerConfig {
        ControllerConfig {
            services,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_snapshot() {
        let registry = ConfigRegistry::from_config(&config(vec![
            service("shop", &["latency", "errors"]),
            service("other", &["errors"]),
        ]));

        assert_eq!(
            registry.list("shop").await.unwrap(),
            vec!["errors".to_string(), "latency".to_string()]
        );
        assert!(registry.contains("other", "errors"));
        assert!(registry.list("missing").await.unwrap().is_empty());

        registry.replace(&config(vec![service("shop", &["latency"])]));
        assert!(!registry.contains("shop", "errors"));
        assert!(registry.contains("shop", "latency"));
        assert!(!registry.contains("other", "errors"));
    }
}
