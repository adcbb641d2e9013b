//! Garbage collection of bookkeeping left behind by removed strategies.
//!
//! # Tick
//! ```text
//! update_counters():
//!     known    = registry.list(namespace)
//!     tracked  = pods under selector carrying the owning-strategy label
//!     owner ∉ known  → miss counter + 1
//!     owner ∈ known  → counter dropped
//!     pod vanished   → counter dropped
//! clean_pods():
//!     counter >= miss_count_before_gc → strip labels/annotations, drop counter
//! ```
//!
//! # Design Decisions
//! - Hysteresis: a strategy must be missing for several consecutive ticks,
//!   so a strategy being restarted is never mistaken for a removed one
//! - Counters live in the collector's own task; no other writer exists
//! - A failed strip keeps the counter so the next pass retries it

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterError, PodActuator, PodLister, StrategyRegistry};
use crate::config::{GcConfig, ServiceConfig};
use crate::observability::metrics;
use crate::pod::traffic::LABEL_STRATEGY;
use crate::pod::Selector;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("invalid garbage collector configuration: {0}")]
    Config(String),

    #[error("garbage collector requires a {0}")]
    MissingCollaborator(&'static str),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Builder checking that every collaborator is present.
#[derive(Default)]
pub struct GarbageCollectorBuilder {
    service: String,
    namespace: String,
    selector: Selector,
    period_secs: u64,
    miss_count_before_gc: u32,
    lister: Option<Arc<dyn PodLister>>,
    actuator: Option<Arc<dyn PodActuator>>,
    registry: Option<Arc<dyn StrategyRegistry>>,
}

impl GarbageCollectorBuilder {
    pub fn new(service: &ServiceConfig, config: &GcConfig) -> Self {
        Self {
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            selector: Selector::from_labels(&service.selector),
            period_secs: config.period_secs,
            miss_count_before_gc: config.miss_count_before_gc,
            ..Default::default()
        }
    }

    pub fn lister(mut self, lister: Arc<dyn PodLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn actuator(mut self, actuator: Arc<dyn PodActuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn StrategyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<GarbageCollector, GcError> {
        if self.period_secs == 0 {
            return Err(GcError::Config("period must be positive".to_string()));
        }
        if self.miss_count_before_gc < 1 {
            return Err(GcError::Config(
                "miss_count_before_gc must be at least 1".to_string(),
            ));
        }

        Ok(GarbageCollector {
            service: self.service,
            namespace: self.namespace,
            selector: self.selector.with_key(LABEL_STRATEGY),
            period: Duration::from_secs(self.period_secs),
            miss_count_before_gc: self.miss_count_before_gc,
            counters: HashMap::new(),
            lister: self.lister.ok_or(GcError::MissingCollaborator("pod lister"))?,
            actuator: self.actuator.ok_or(GcError::MissingCollaborator("pod actuator"))?,
            registry: self
                .registry
                .ok_or(GcError::MissingCollaborator("strategy registry"))?,
        })
    }
}

pub struct GarbageCollector {
    service: String,
    namespace: String,
    selector: Selector,
    period: Duration,
    miss_count_before_gc: u32,
    counters: HashMap<String, u32>,
    lister: Arc<dyn PodLister>,
    actuator: Arc<dyn PodActuator>,
    registry: Arc<dyn StrategyRegistry>,
}

impl GarbageCollector {
    pub fn builder(service: &ServiceConfig, config: &GcConfig) -> GarbageCollectorBuilder {
        GarbageCollectorBuilder::new(service, config)
    }

    /// Current miss count of `namespace/name`.
    pub fn miss_count(&self, key: &str) -> u32 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            service = %self.service,
            period_secs = self.period.as_secs(),
            miss_count_before_gc = self.miss_count_before_gc,
            "Garbage collector starting"
        );

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(
                        service = %self.service,
                        "Garbage collector received shutdown signal, exiting loop"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        metrics::record_tick_error(&self.service, "gc");
                        tracing::error!(
                            service = %self.service,
                            error = %e,
                            "Garbage collection failed"
                        );
                    }
                }
            }
        }
    }

    /// One full pass. Returns the number of pods stripped.
    pub async fn tick(&mut self) -> Result<usize, GcError> {
        self.update_counters().await?;
        Ok(self.clean_pods().await)
    }

    pub async fn update_counters(&mut self) -> Result<(), GcError> {
        let known: HashSet<String> = self
            .registry
            .list(&self.namespace)
            .await?
            .into_iter()
            .collect();
        let pods = self.lister.list(&self.namespace, &self.selector).await?;

        let mut listed = HashSet::with_capacity(pods.len());
        for pod in &pods {
            let Some(owner) = pod.strategy() else {
                continue;
            };
            let key = pod.key();
            listed.insert(key.clone());

            if known.contains(owner) {
                if let Some(previous) = self.counters.remove(&key) {
                    tracing::info!(
                        pod = %key,
                        strategy = %owner,
                        previous,
                        "Owning strategy is known again, miss counter reset"
                    );
                }
                continue;
            }

            let count = self.counters.entry(key.clone()).or_insert(0);
            *count += 1;
            tracing::debug!(
                pod = %key,
                strategy = %owner,
                misses = *count,
                "Owning strategy missing"
            );
        }

        self.counters.retain(|key, _| listed.contains(key));
        Ok(())
    }

    /// Strip pods whose counter reached the threshold. Failures stay queued.
    pub async fn clean_pods(&mut self) -> usize {
        let due: Vec<String> = self
            .counters
            .iter()
            .filter(|(_, misses)| **misses >= self.miss_count_before_gc)
            .map(|(key, _)| key.clone())
            .collect();

        let mut stripped = 0;
        for key in due {
            let Some((namespace, name)) = key.split_once('/') else {
                tracing::warn!(key = %key, "Malformed garbage collector key");
                continue;
            };

            let pod = match self.lister.get(namespace, name).await {
                Ok(Some(pod)) => pod,
                Ok(None) => {
                    self.counters.remove(&key);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        pod = %key,
                        error = %e,
                        "Cannot read pod for garbage collection"
                    );
                    continue;
                }
            };

            match self.actuator.strip_bookkeeping(&pod).await {
                Ok(_) => {
                    tracing::info!(pod = %key, "Stripped bookkeeping of removed strategy");
                    metrics::record_gc_strip(&self.service);
                    self.counters.remove(&key);
                    stripped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        pod = %key,
                        error = %e,
                        "Failed to strip bookkeeping, will retry"
                    );
                }
            }
        }
        stripped
    }
}
