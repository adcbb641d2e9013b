//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the breaker.
//! All types derive Serde traits for deserialization from config files, and
//! `PartialEq` so the supervisor can tell which components changed on reload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Cluster API access.
    pub cluster: ClusterConfig,

    /// Time-series query backend.
    pub metric_source: MetricSourceConfig,

    /// Managed services.
    pub services: Vec<ServiceConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9102".to_string(),
        }
    }
}

/// Cluster API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the API server.
    pub api_url: String,

    /// File holding a bearer token.
    pub token_path: Option<String>,

    /// Skip TLS verification of the API server.
    pub accept_invalid_certs: bool,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token_path: Some("/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()),
            accept_invalid_certs: false,
            request_timeout_secs: 5,
        }
    }
}

/// Metric source configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricSourceConfig {
    /// Base URL of the Prometheus-compatible query API.
    pub url: String,

    /// Query timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for MetricSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            timeout_secs: 5,
        }
    }
}

/// A load-balanced service whose pods are managed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Service identifier for logging/metrics.
    pub name: String,

    /// Namespace of the pods.
    pub namespace: String,

    /// Labels selecting the pods of the service.
    pub selector: BTreeMap<String, String>,

    /// Breaker strategies applied to the service.
    #[serde(default)]
    pub strategies: Vec<BreakerStrategyConfig>,

    /// Activator applied to every cut pod of the service.
    #[serde(default)]
    pub default_activator: ActivatorConfig,

    /// Cleanup of bookkeeping left by removed strategies.
    #[serde(default)]
    pub gc: GcConfig,
}

/// A named breaker strategy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BreakerStrategyConfig {
    /// Strategy name, unique per namespace.
    pub name: String,

    /// Evaluation period in seconds.
    #[serde(default = "default_evaluation_period")]
    pub evaluation_period_secs: u64,

    /// Minimum number of pods that must stay available.
    #[serde(default)]
    pub min_available_count: u32,

    /// Minimum percentage of running pods that must stay available.
    #[serde(default)]
    pub min_available_ratio: u32,

    /// Anomaly detection variant.
    pub detector: DetectorConfig,

    /// Dedicated activator for pods cut by this strategy.
    #[serde(default)]
    pub activator: Option<ActivatorConfig>,
}

fn default_evaluation_period() -> u64 {
    10
}

/// Anomaly detection variants. Exactly one is configured per strategy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DetectorConfig {
    DiscreteValueOutOfList(DiscreteValueOutOfListConfig),
    ContinuousValueDeviation(ContinuousValueDeviationConfig),
    CustomService(CustomServiceConfig),
}

/// Flags pods whose share of samples outside an allowed value set is too high.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DiscreteValueOutOfListConfig {
    /// Query returning one sample per (pod, value).
    pub query: String,

    /// Label carrying the discriminating value (e.g. HTTP code).
    pub key: String,

    /// Label carrying the pod name.
    pub pod_name_key: String,

    /// Values counted as good. Exclusive with `bad_values`.
    #[serde(default)]
    pub good_values: Option<Vec<String>>,

    /// Values counted as bad. Exclusive with `good_values`.
    #[serde(default)]
    pub bad_values: Option<Vec<String>>,

    /// Minimum ok+ko before a pod can be flagged.
    #[serde(default)]
    pub minimum_activity_count: u64,

    /// Maximum tolerated percentage of bad samples.
    #[serde(default)]
    pub tolerance_percent: u64,
}

/// Flags pods whose value deviates from the nominal 1.0.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContinuousValueDeviationConfig {
    /// Query returning one ratio per pod.
    pub query: String,

    /// Label carrying the pod name.
    pub pod_name_key: String,

    /// Maximum tolerated deviation in percent. Must be non-zero.
    pub max_deviation_percent: f64,
}

/// Delegates the verdict to an external service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CustomServiceConfig {
    /// URL answering with the list of pods to cut.
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_custom_timeout")]
    pub timeout_secs: u64,
}

fn default_custom_timeout() -> u64 {
    2
}

/// Reactivation policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivatorMode {
    /// Reinstate after one period.
    #[default]
    Periodic,
    /// Reinstate with growing delay, delete once retries are exhausted.
    RetryAndKill,
    /// Reinstate with growing delay, park once retries are exhausted.
    RetryAndPause,
}

/// Activator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ActivatorConfig {
    pub mode: ActivatorMode,

    /// Tick period and base retry period, in seconds.
    pub period_secs: u64,

    /// Required for `retry_and_kill` and `retry_and_pause`.
    pub max_retry_count: Option<u32>,

    /// Required for `retry_and_pause`.
    pub max_pause_count: Option<u32>,
}

impl Default for ActivatorConfig {
    fn default() -> Self {
        Self {
            mode: ActivatorMode::Periodic,
            period_secs: 60,
            max_retry_count: None,
            max_pause_count: None,
        }
    }
}

/// Garbage collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GcConfig {
    /// Collection period in seconds.
    pub period_secs: u64,

    /// Consecutive misses before bookkeeping is stripped.
    pub miss_count_before_gc: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            miss_count_before_gc: 3,
        }
    }
}
