//! Breaker: cuts anomalous pods out of traffic within a safety quota.
//!
//! # States
//! - Idle: waiting for the next evaluation tick
//! - Evaluating: violators fetched, quota computed, bounded subset cut
//!
//! # Tick
//! ```text
//! violators = detector.pods_out_of_bounds()      (empty ⇒ done)
//! running   = pods under selector in phase Running
//! quota     = max(min_count, floor(min_ratio * running / 100))
//! remove    = min(running - quota, violators), never negative
//! cut the first `remove` violators, ordered by (namespace, name)
//! ```
//!
//! # Design Decisions
//! - A failed cut is logged; the pod is still a violator on the next tick
//! - Violators are sorted so the cut subset is reproducible
//! - Cancellation is observed between ticks

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::anomaly::{AnomalyDetector, DetectorContext, DetectorError};
use crate::cluster::{ClusterError, PodActuator, PodLister};
use crate::config::{BreakerStrategyConfig, ServiceConfig};
use crate::observability::metrics;
use crate::pod::bookkeeping::ANNOTATION_RETRY_COUNT;
use crate::pod::{Pod, Selector, TrafficState};
use crate::query::MetricSource;

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("invalid breaker configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Minimum number of pods that must stay available out of `running`.
pub fn compute_quota(running: usize, min_available_count: u32, min_available_ratio: u32) -> usize {
    let by_ratio = (min_available_ratio as usize).saturating_mul(running) / 100;
    (min_available_count as usize).max(by_ratio)
}

/// Number of violators that may be cut this tick, given the pods still serving.
pub fn remove_count(healthy: usize, quota: usize, violators: usize) -> usize {
    healthy.saturating_sub(quota).min(violators)
}

/// Running and not already cut or paused.
fn is_healthy(pod: &Pod) -> bool {
    pod.is_running() && !matches!(pod.traffic(), Some(TrafficState::No | TrafficState::Pause))
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub violators: usize,
    pub running: usize,
    /// Running pods still receiving traffic before this tick's cuts.
    pub healthy: usize,
    pub quota: usize,
    pub cut: usize,
}

pub struct Breaker {
    service: String,
    strategy: String,
    namespace: String,
    selector: Selector,
    period: Duration,
    min_available_count: u32,
    min_available_ratio: u32,
    detector: AnomalyDetector,
    lister: Arc<dyn PodLister>,
    actuator: Arc<dyn PodActuator>,
}

impl Breaker {
    pub fn new(
        service: &ServiceConfig,
        strategy: &BreakerStrategyConfig,
        lister: Arc<dyn PodLister>,
        actuator: Arc<dyn PodActuator>,
        metric_source: Option<Arc<dyn MetricSource>>,
    ) -> Result<Self, BreakerError> {
        if strategy.evaluation_period_secs == 0 {
            return Err(BreakerError::Config(
                "evaluation period must be positive".to_string(),
            ));
        }
        if strategy.min_available_ratio > 100 {
            return Err(BreakerError::Config(format!(
                "min_available_ratio {} exceeds 100",
                strategy.min_available_ratio
            )));
        }

        let selector = Selector::from_labels(&service.selector);
        let detector = AnomalyDetector::new(
            &strategy.detector,
            DetectorContext {
                namespace: service.namespace.clone(),
                selector: selector.clone(),
                lister: lister.clone(),
                metrics: metric_source,
            },
        )?;

        Ok(Self {
            service: service.name.clone(),
            strategy: strategy.name.clone(),
            namespace: service.namespace.clone(),
            selector,
            period: Duration::from_secs(strategy.evaluation_period_secs),
            min_available_count: strategy.min_available_count,
            min_available_ratio: strategy.min_available_ratio,
            detector,
            lister,
            actuator,
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            service = %self.service,
            strategy = %self.strategy,
            detector = self.detector.kind(),
            period_secs = self.period.as_secs(),
            "Breaker starting"
        );

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(
                        strategy = %self.strategy,
                        "Breaker received shutdown signal, exiting loop"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        metrics::record_tick_error(&self.service, "breaker");
                        tracing::error!(
                            service = %self.service,
                            strategy = %self.strategy,
                            error = %e,
                            "Breaker evaluation failed"
                        );
                    }
                }
            }
        }
    }

    /// One evaluation. Errors abandon this tick only.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, BreakerError> {
        let mut violators = self.detector.pods_out_of_bounds().await?;
        metrics::record_violators(&self.service, &self.strategy, violators.len());
        if violators.is_empty() {
            return Ok(TickReport::default());
        }

        let pods = self.lister.list(&self.namespace, &self.selector).await?;
        let running = pods.iter().filter(|p| p.is_running()).count();
        let healthy = pods.iter().filter(|p| is_healthy(p)).count();
        let quota = compute_quota(running, self.min_available_count, self.min_available_ratio);
        let remove = remove_count(healthy, quota, violators.len());

        violators.sort_by(|a, b| (a.namespace(), a.name()).cmp(&(b.namespace(), b.name())));

        if remove < violators.len() {
            tracing::warn!(
                strategy = %self.strategy,
                violators = violators.len(),
                running,
                healthy,
                quota,
                remove,
                "Availability quota limits the number of pods cut"
            );
        }

        let mut cut = 0;
        for pod in violators.iter().take(remove) {
            if self.cut(pod, now).await {
                cut += 1;
            }
        }

        Ok(TickReport {
            violators: violators.len(),
            running,
            healthy,
            quota,
            cut,
        })
    }

    async fn cut(&self, pod: &Pod, now: DateTime<Utc>) -> bool {
        match self.actuator.set_traffic_no(pod, &self.strategy, now).await {
            Ok(updated) => {
                tracing::info!(
                    pod = %updated.key(),
                    strategy = %self.strategy,
                    retry_count = ?updated.annotation(ANNOTATION_RETRY_COUNT),
                    "Pod cut from traffic"
                );
                metrics::record_cut(&self.service, &self.strategy);
                true
            }
            Err(e) => {
                tracing::warn!(
                    pod = %pod.key(),
                    error = %e,
                    "Failed to cut pod, will retry next tick"
                );
                false
            }
        }
    }
}
