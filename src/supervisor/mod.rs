//! Supervision of the per-service periodic components.
//!
//! # Layout
//! ```text
//! for each service:
//!     one Breaker per strategy
//!     one Activator per strategy that declares one
//!     the default Activator
//!     one GarbageCollector
//! ```
//!
//! Each component runs in its own task with its own child token, so a
//! reload restarts exactly the components whose configuration changed.
//! The strategy registry is swapped before any restart so a fresh
//! garbage collector never sees the previous strategy set. A change to the
//! cluster or metric-source settings rebuilds the collaborators and
//! restarts every component.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activator::{Activator, ActivatorError};
use crate::breaker::{Breaker, BreakerError};
use crate::cluster::{ConfigRegistry, PodActuator, PodLister};
use crate::config::{
    ActivatorConfig, BreakerStrategyConfig, ControllerConfig, GcConfig, ServiceConfig,
};
use crate::gc::{GarbageCollector, GcError};
use crate::lifecycle::startup::{build_collaborators, collaborators_changed, StartupError};
use crate::query::MetricSource;

/// Shared collaborators handed to every component.
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn PodLister>,
    pub actuator: Arc<dyn PodActuator>,
    pub registry: Arc<ConfigRegistry>,
    pub metric_source: Option<Arc<dyn MetricSource>>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("cannot start {component}: {source}")]
    Breaker {
        component: ComponentKey,
        source: BreakerError,
    },

    #[error("cannot start {component}: {source}")]
    Activator {
        component: ComponentKey,
        source: ActivatorError,
    },

    #[error("cannot start {component}: {source}")]
    Gc {
        component: ComponentKey,
        source: GcError,
    },
}

/// Identity of a supervised component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKey {
    Breaker { service: String, strategy: String },
    /// `strategy` is `None` for the service's default activator.
    Activator { service: String, strategy: Option<String> },
    Gc { service: String },
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKey::Breaker { service, strategy } => {
                write!(f, "breaker {}/{}", service, strategy)
            }
            ComponentKey::Activator { service, strategy } => write!(
                f,
                "activator {}/{}",
                service,
                strategy.as_deref().unwrap_or("default")
            ),
            ComponentKey::Gc { service } => write!(f, "garbage collector {}", service),
        }
    }
}

/// Everything a component is built from. Two equal specs build equal components.
#[derive(Debug, Clone, PartialEq)]
enum ComponentSpec {
    Breaker {
        scope: ServiceConfig,
        strategy: BreakerStrategyConfig,
    },
    Activator {
        scope: ServiceConfig,
        strategy: Option<String>,
        config: ActivatorConfig,
    },
    Gc {
        scope: ServiceConfig,
        config: GcConfig,
    },
}

/// The part of a service every component depends on: identity and selection.
fn scope(service: &ServiceConfig) -> ServiceConfig {
    ServiceConfig {
        strategies: Vec::new(),
        default_activator: ActivatorConfig::default(),
        gc: GcConfig::default(),
        ..service.clone()
    }
}

fn desired(config: &ControllerConfig) -> BTreeMap<ComponentKey, ComponentSpec> {
    let mut specs = BTreeMap::new();
    for service in &config.services {
        let scope = scope(service);

        for strategy in &service.strategies {
            specs.insert(
                ComponentKey::Breaker {
                    service: service.name.clone(),
                    strategy: strategy.name.clone(),
                },
                ComponentSpec::Breaker {
                    scope: scope.clone(),
                    strategy: BreakerStrategyConfig {
                        activator: None,
                        ..strategy.clone()
                    },
                },
            );
            if let Some(activator) = &strategy.activator {
                specs.insert(
                    ComponentKey::Activator {
                        service: service.name.clone(),
                        strategy: Some(strategy.name.clone()),
                    },
                    ComponentSpec::Activator {
                        scope: scope.clone(),
                        strategy: Some(strategy.name.clone()),
                        config: activator.clone(),
                    },
                );
            }
        }

        specs.insert(
            ComponentKey::Activator {
                service: service.name.clone(),
                strategy: None,
            },
            ComponentSpec::Activator {
                scope: scope.clone(),
                strategy: None,
                config: service.default_activator.clone(),
            },
        );
        specs.insert(
            ComponentKey::Gc {
                service: service.name.clone(),
            },
            ComponentSpec::Gc {
                scope,
                config: service.gc.clone(),
            },
        );
    }
    specs
}

struct Running {
    spec: ComponentSpec,
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the component tasks of every configured service.
pub struct ServiceSupervisor {
    collaborators: Collaborators,
    root: CancellationToken,
    running: HashMap<ComponentKey, Running>,
    generation: u64,
    applied: Option<ControllerConfig>,
}

impl ServiceSupervisor {
    /// `root` is usually a child of the process shutdown token.
    pub fn new(collaborators: Collaborators, root: CancellationToken) -> Self {
        Self {
            collaborators,
            root,
            running: HashMap::new(),
            generation: 0,
            applied: None,
        }
    }

    /// Bring the running set in line with `config`.
    ///
    /// Unchanged components keep running. A component that fails to build is
    /// reported and left stopped; the others still start.
    pub async fn reconcile(&mut self, config: &ControllerConfig) -> Vec<SupervisorError> {
        self.collaborators.registry.replace(config);

        let mut desired = desired(config);

        let stale: Vec<ComponentKey> = self
            .running
            .iter()
            .filter(|(key, running)| desired.get(*key) != Some(&running.spec))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.stop(&key).await;
        }

        desired.retain(|key, _| !self.running.contains_key(key));

        let mut errors = Vec::new();
        for (key, spec) in desired {
            if let Err(e) = self.start(key, spec) {
                tracing::error!(error = %e, "Component not started");
                errors.push(e);
            }
        }

        self.applied = Some(config.clone());
        tracing::info!(components = self.running.len(), "Reconciled services");
        errors
    }

    /// Apply a reloaded configuration.
    ///
    /// New cluster or metric-source settings rebuild the collaborators first.
    /// If that fails nothing is stopped and the error is returned.
    pub async fn reload(
        &mut self,
        next: &ControllerConfig,
    ) -> Result<Vec<SupervisorError>, StartupError> {
        if let Some(current) = &self.applied {
            if current.observability != next.observability {
                tracing::warn!("Observability settings are applied only at startup");
            }
            if collaborators_changed(current, next) {
                let collaborators = build_collaborators(next)?;
                tracing::info!(
                    "Cluster or metric source settings changed, restarting all components"
                );
                self.replace_collaborators(collaborators).await;
            }
        }
        Ok(self.reconcile(next).await)
    }

    /// Stop every component and swap the collaborators. The next
    /// `reconcile` starts the components again.
    pub async fn replace_collaborators(&mut self, collaborators: Collaborators) {
        let keys: Vec<ComponentKey> = self.running.keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
        self.collaborators = collaborators;
    }

    /// Components currently running, sorted.
    pub fn components(&self) -> Vec<ComponentKey> {
        let mut keys: Vec<ComponentKey> = self.running.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Start counter of a running component; changes whenever it is restarted.
    pub fn generation(&self, key: &ComponentKey) -> Option<u64> {
        self.running.get(key).map(|r| r.generation)
    }

    /// Cancel every component and wait for the tasks to finish.
    pub async fn shutdown(mut self) {
        self.root.cancel();
        for (key, running) in self.running.drain() {
            if let Err(e) = running.handle.await {
                tracing::warn!(component = %key, error = %e, "Component task ended abnormally");
            }
        }
        tracing::info!("All components stopped");
    }

    async fn stop(&mut self, key: &ComponentKey) {
        if let Some(running) = self.running.remove(key) {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!(component = %key, error = %e, "Component task ended abnormally");
            }
            tracing::info!(component = %key, "Component stopped");
        }
    }

    fn start(&mut self, key: ComponentKey, spec: ComponentSpec) -> Result<(), SupervisorError> {
        let c = &self.collaborators;
        let cancel = self.root.child_token();
        let token = cancel.clone();

        let handle = match &spec {
            ComponentSpec::Breaker { scope, strategy } => {
                let breaker = Breaker::new(
                    scope,
                    strategy,
                    c.lister.clone(),
                    c.actuator.clone(),
                    c.metric_source.clone(),
                )
                .map_err(|source| SupervisorError::Breaker {
                    component: key.clone(),
                    source,
                })?;
                tokio::spawn(breaker.run(token))
            }
            ComponentSpec::Activator {
                scope,
                strategy,
                config,
            } => {
                let activator = Activator::new(
                    scope,
                    strategy.as_deref(),
                    config,
                    c.lister.clone(),
                    c.actuator.clone(),
                )
                .map_err(|source| SupervisorError::Activator {
                    component: key.clone(),
                    source,
                })?;
                tokio::spawn(activator.run(token))
            }
            ComponentSpec::Gc { scope, config } => {
                let gc = GarbageCollector::builder(scope, config)
                    .lister(c.lister.clone())
                    .actuator(c.actuator.clone())
                    .registry(c.registry.clone())
                    .build()
                    .map_err(|source| SupervisorError::Gc {
                        component: key.clone(),
                        source,
                    })?;
                tokio::spawn(gc.run(token))
            }
        };

        self.generation += 1;
        tracing::info!(component = %key, generation = self.generation, "Component started");
        self.running.insert(
            key,
            Running {
                spec,
                generation: self.generation,
                cancel,
                handle,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::config::{
        ActivatorMode, CustomServiceConfig, DetectorConfig, DiscreteValueOutOfListConfig,
    };

    fn collaborators() -> Collaborators {
        let cluster = Arc::new(MemoryCluster::new());
        Collaborators {
            lister: cluster.clone(),
            actuator: cluster,
            registry: Arc::new(ConfigRegistry::new()),
            metric_source: None,
        }
    }

    fn strategy(name: &str) -> BreakerStrategyConfig {
        BreakerStrategyConfig {
            name: name.to_string(),
            evaluation_period_secs: 3600,
            min_available_count: 1,
            min_available_ratio: 0,
            detector: DetectorConfig::CustomService(CustomServiceConfig {
                url: "http://127.0.0.1:9/pods".to_string(),
                timeout_secs: 1,
            }),
            activator: None,
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            services: vec![ServiceConfig {
                name: "checkout".to_string(),
                namespace: "shop".to_string(),
                selector: BTreeMap::from([("app".to_string(), "checkout".to_string())]),
                strategies: vec![strategy("errors"), strategy("latency")],
                default_activator: ActivatorConfig {
                    period_secs: 3600,
                    ..Default::default()
                },
                gc: GcConfig {
                    period_secs: 3600,
                    miss_count_before_gc: 3,
                },
            }],
            ..Default::default()
        }
    }

    fn breaker(strategy: &str) -> ComponentKey {
        ComponentKey::Breaker {
            service: "checkout".to_string(),
            strategy: strategy.to_string(),
        }
    }

    #[tokio::test]
    async fn test_starts_every_component() {
        let c = collaborators();
        let registry = c.registry.clone();
        let mut supervisor = ServiceSupervisor::new(c, CancellationToken::new());

        assert!(supervisor.reconcile(&config()).await.is_empty());
        // two breakers, the default activator and the collector
        assert_eq!(supervisor.components().len(), 4);
        assert!(registry.contains("shop", "latency"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_restarts_only_changed_components() {
        let mut supervisor = ServiceSupervisor::new(collaborators(), CancellationToken::new());
        supervisor.reconcile(&config()).await;

        let errors_gen = supervisor.generation(&breaker("errors"));
        let latency_gen = supervisor.generation(&breaker("latency"));
        let gc_key = ComponentKey::Gc {
            service: "checkout".to_string(),
        };
        let gc_gen = supervisor.generation(&gc_key);

        let mut next = config();
        next.services[0].strategies[1].min_available_count = 2;
        next.services[0].strategies[0].activator = Some(ActivatorConfig {
            mode: ActivatorMode::RetryAndKill,
            period_secs: 3600,
            max_retry_count: Some(3),
            max_pause_count: None,
        });
        assert!(supervisor.reconcile(&next).await.is_empty());

        assert_eq!(supervisor.generation(&breaker("errors")), errors_gen);
        assert_eq!(supervisor.generation(&gc_key), gc_gen);
        assert_ne!(supervisor.generation(&breaker("latency")), latency_gen);
        assert!(supervisor
            .generation(&ComponentKey::Activator {
                service: "checkout".to_string(),
                strategy: Some("errors".to_string()),
            })
            .is_some());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_removed_strategy_stops_and_leaves_registry() {
        let c = collaborators();
        let registry = c.registry.clone();
        let mut supervisor = ServiceSupervisor::new(c, CancellationToken::new());
        supervisor.reconcile(&config()).await;

        let mut next = config();
        next.services[0].strategies.truncate(1);
        supervisor.reconcile(&next).await;

        assert!(supervisor.generation(&breaker("latency")).is_none());
        assert!(!registry.contains("shop", "latency"));
        assert!(registry.contains("shop", "errors"));

        supervisor.shutdown().await;
    }

    fn unreachable_backends(mut config: ControllerConfig) -> ControllerConfig {
        config.cluster.api_url = "http://127.0.0.1:9/".to_string();
        config.metric_source.url = "http://127.0.0.1:9/".to_string();
        config
    }

    fn discrete(name: &str) -> BreakerStrategyConfig {
        BreakerStrategyConfig {
            detector: DetectorConfig::DiscreteValueOutOfList(DiscreteValueOutOfListConfig {
                query: "sum by (pod, code) (rate(http_requests_total[1m]))".to_string(),
                key: "code".to_string(),
                pod_name_key: "pod".to_string(),
                good_values: Some(vec!["200".to_string()]),
                bad_values: None,
                minimum_activity_count: 10,
                tolerance_percent: 5,
            }),
            ..strategy(name)
        }
    }

    #[tokio::test]
    async fn test_reload_adds_metric_strategy_to_custom_only_service() {
        let initial = unreachable_backends(config());
        let mut supervisor = ServiceSupervisor::new(
            build_collaborators(&initial).unwrap(),
            CancellationToken::new(),
        );
        assert!(supervisor.reconcile(&initial).await.is_empty());

        let mut next = initial.clone();
        next.services[0].strategies.push(discrete("codes"));
        let errors = supervisor.reload(&next).await.unwrap();
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert!(supervisor.generation(&breaker("codes")).is_some());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_with_new_metric_source_restarts_everything() {
        let initial = unreachable_backends(config());
        let mut supervisor = ServiceSupervisor::new(
            build_collaborators(&initial).unwrap(),
            CancellationToken::new(),
        );
        supervisor.reconcile(&initial).await;
        let before: Vec<Option<u64>> = supervisor
            .components()
            .iter()
            .map(|k| supervisor.generation(k))
            .collect();

        let mut next = initial.clone();
        next.metric_source.url = "http://127.0.0.1:10/".to_string();
        assert!(supervisor.reload(&next).await.unwrap().is_empty());

        let keys = supervisor.components();
        assert_eq!(keys.len(), before.len());
        for (key, old) in keys.iter().zip(before) {
            assert_ne!(supervisor.generation(key), old, "{} was not restarted", key);
        }

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_backends_keep_components_on_reload() {
        let initial = unreachable_backends(config());
        let mut supervisor = ServiceSupervisor::new(
            build_collaborators(&initial).unwrap(),
            CancellationToken::new(),
        );
        supervisor.reconcile(&initial).await;
        let generation = supervisor.generation(&breaker("errors"));

        assert!(supervisor.reload(&initial).await.unwrap().is_empty());
        assert_eq!(supervisor.generation(&breaker("errors")), generation);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_component_is_reported() {
        let mut supervisor = ServiceSupervisor::new(collaborators(), CancellationToken::new());
        let mut bad = config();
        bad.services[0].strategies[0].evaluation_period_secs = 0;

        let errors = supervisor.reconcile(&bad).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SupervisorError::Breaker { .. }));
        assert_eq!(supervisor.components().len(), 3);

        supervisor.shutdown().await;
    }
}
