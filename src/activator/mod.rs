//! Activator: decides when cut pods get traffic back.
//!
//! # Policies
//! ```text
//! Periodic:       now > breakAt + period            → reactivate
//! RetryAndKill:   retryCount > maxRetry              → delete
//!                 now > breakAt + retryCount*period  → reactivate
//! RetryAndPause:  retryCount > maxRetry              → pause, or delete when
//!                                                      paused >= maxPause
//!                 now > breakAt + retryCount*period  → reactivate
//! ```
//! `period` is the configured period multiplied by 1000, in milliseconds.
//!
//! # Design Decisions
//! - Ticks on its own period, independent of any breaker
//! - A pod with unreadable bookkeeping is skipped, not fatal to the tick
//! - Policy requirements are checked once, at construction

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterError, PodActuator, PodLister};
use crate::config::{ActivatorConfig, ActivatorMode, ServiceConfig};
use crate::observability::metrics;
use crate::pod::traffic::{LABEL_STRATEGY, LABEL_TRAFFIC};
use crate::pod::{Bookkeeping, Pod, Selector, TrafficState};

#[derive(Debug, Error)]
pub enum ActivatorError {
    #[error("invalid activator configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Validated reactivation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivatorPolicy {
    Periodic,
    RetryAndKill { max_retry_count: u32 },
    RetryAndPause { max_retry_count: u32, max_pause_count: u32 },
}

impl ActivatorPolicy {
    pub fn from_config(config: &ActivatorConfig) -> Result<Self, ActivatorError> {
        if config.period_secs == 0 {
            return Err(ActivatorError::Config("period must be positive".to_string()));
        }
        let max_retry = || {
            config
                .max_retry_count
                .ok_or_else(|| ActivatorError::Config("max_retry_count is required".to_string()))
        };
        match config.mode {
            ActivatorMode::Periodic => Ok(Self::Periodic),
            ActivatorMode::RetryAndKill => Ok(Self::RetryAndKill {
                max_retry_count: max_retry()?,
            }),
            ActivatorMode::RetryAndPause => Ok(Self::RetryAndPause {
                max_retry_count: max_retry()?,
                max_pause_count: config.max_pause_count.ok_or_else(|| {
                    ActivatorError::Config("max_pause_count is required".to_string())
                })?,
            }),
        }
    }
}

/// Decision for a single cut pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not yet time.
    Wait,
    /// Flip traffic back to `yes`.
    Reactivate,
    /// Retries exhausted, delete the pod.
    Delete,
    /// Retries exhausted; pause unless `max_pause_count` pods are already paused.
    PauseOrDelete { max_pause_count: u32 },
}

/// Retry period in milliseconds: the configured period times 1000.
pub fn retry_period_ms(period_secs: u64) -> i64 {
    i64::try_from(period_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

fn elapsed_beyond(now: DateTime<Utc>, break_at: DateTime<Utc>, wait_ms: i64) -> bool {
    match TimeDelta::try_milliseconds(wait_ms).and_then(|d| break_at.checked_add_signed(d)) {
        Some(deadline) => now > deadline,
        None => false,
    }
}

/// Pure policy evaluation.
pub fn decide(
    policy: ActivatorPolicy,
    book: &Bookkeeping,
    retry_period_ms: i64,
    now: DateTime<Utc>,
) -> Decision {
    let backoff_ms = retry_period_ms.saturating_mul(book.retry_count as i64);
    let retry_or_wait = |wait_ms| {
        if elapsed_beyond(now, book.break_at, wait_ms) {
            Decision::Reactivate
        } else {
            Decision::Wait
        }
    };

    match policy {
        ActivatorPolicy::Periodic => retry_or_wait(retry_period_ms),
        ActivatorPolicy::RetryAndKill { max_retry_count } => {
            if book.retry_count > max_retry_count {
                Decision::Delete
            } else {
                retry_or_wait(backoff_ms)
            }
        }
        ActivatorPolicy::RetryAndPause {
            max_retry_count,
            max_pause_count,
        } => {
            if book.retry_count > max_retry_count {
                Decision::PauseOrDelete { max_pause_count }
            } else {
                retry_or_wait(backoff_ms)
            }
        }
    }
}

/// Outcome of one activator tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivatorReport {
    pub reactivated: usize,
    pub paused: usize,
    pub deleted: usize,
    pub skipped: usize,
}

pub struct Activator {
    service: String,
    name: String,
    namespace: String,
    selector: Selector,
    policy: ActivatorPolicy,
    period: Duration,
    retry_period_ms: i64,
    lister: Arc<dyn PodLister>,
    actuator: Arc<dyn PodActuator>,
}

impl Activator {
    /// Build an activator. With `strategy`, only pods owned by that strategy are handled;
    /// without, every cut pod of the service is.
    pub fn new(
        service: &ServiceConfig,
        strategy: Option<&str>,
        config: &ActivatorConfig,
        lister: Arc<dyn PodLister>,
        actuator: Arc<dyn PodActuator>,
    ) -> Result<Self, ActivatorError> {
        let policy = ActivatorPolicy::from_config(config)?;
        let mut selector = Selector::from_labels(&service.selector);
        if let Some(strategy) = strategy {
            selector = selector.with_label(LABEL_STRATEGY, strategy);
        }

        Ok(Self {
            service: service.name.clone(),
            name: strategy.unwrap_or("default").to_string(),
            namespace: service.namespace.clone(),
            selector,
            policy,
            period: Duration::from_secs(config.period_secs),
            retry_period_ms: retry_period_ms(config.period_secs),
            lister,
            actuator,
        })
    }

    pub fn policy(&self) -> ActivatorPolicy {
        self.policy
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            service = %self.service,
            activator = %self.name,
            policy = ?self.policy,
            period_secs = self.period.as_secs(),
            "Activator starting"
        );

        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(
                        activator = %self.name,
                        "Activator received shutdown signal, exiting loop"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        metrics::record_tick_error(&self.service, "activator");
                        tracing::error!(
                            service = %self.service,
                            activator = %self.name,
                            error = %e,
                            "Activator tick failed"
                        );
                    }
                }
            }
        }
    }

    fn in_state(&self, state: TrafficState) -> Selector {
        self.selector.clone().with_label(LABEL_TRAFFIC, state.as_str())
    }

    /// Apply the policy to every cut pod. Per-pod failures are logged and skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ActivatorReport, ActivatorError> {
        let cut = self
            .lister
            .list(&self.namespace, &self.in_state(TrafficState::No))
            .await?;

        let mut report = ActivatorReport::default();
        for pod in &cut {
            let book = match Bookkeeping::read(pod) {
                Ok(book) => book,
                Err(e) => {
                    tracing::warn!(
                        pod = %pod.key(),
                        error = %e,
                        "Cut pod has unusable bookkeeping, skipped"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let decision = decide(self.policy, &book, self.retry_period_ms, now);
            tracing::debug!(
                pod = %pod.key(),
                retry_count = book.retry_count,
                ?decision,
                "Activator decision"
            );

            if let Err(e) = self.apply(pod, decision, &mut report).await {
                tracing::warn!(
                    pod = %pod.key(),
                    ?decision,
                    error = %e,
                    "Failed to apply activator decision"
                );
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        pod: &Pod,
        decision: Decision,
        report: &mut ActivatorReport,
    ) -> Result<(), ClusterError> {
        match decision {
            Decision::Wait => {}
            Decision::Reactivate => {
                self.actuator.set_traffic_yes(pod).await?;
                tracing::info!(pod = %pod.key(), activator = %self.name, "Pod reactivated");
                metrics::record_reactivation(&self.service, &self.name);
                report.reactivated += 1;
            }
            Decision::Delete => {
                self.delete(pod).await?;
                report.deleted += 1;
            }
            Decision::PauseOrDelete { max_pause_count } => {
                let paused = self
                    .lister
                    .list(&self.namespace, &self.in_state(TrafficState::Pause))
                    .await?
                    .len();
                if paused >= max_pause_count as usize {
                    tracing::info!(
                        pod = %pod.key(),
                        paused,
                        max_pause_count,
                        "Pause quota reached"
                    );
                    self.delete(pod).await?;
                    report.deleted += 1;
                } else {
                    self.actuator.set_traffic_pause(pod).await?;
                    tracing::info!(pod = %pod.key(), activator = %self.name, "Pod paused");
                    metrics::record_pause(&self.service, &self.name);
                    report.paused += 1;
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, pod: &Pod) -> Result<(), ClusterError> {
        self.actuator.delete(pod).await?;
        tracing::info!(
            pod = %pod.key(),
            activator = %self.name,
            "Pod deleted after exhausting retries"
        );
        metrics::record_kill(&self.service, &self.name);
        Ok(())
    }
}
