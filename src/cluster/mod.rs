//! Cluster collaborators: listing, actuation and the strategy registry.
//!
//! # Data Flow
//! ```text
//! Breaker / Activator / GC
//!     → PodLister::list (cached, eventually consistent)
//!     → decide
//!     → PodActuator::{set_traffic_*, strip_bookkeeping, delete}
//!         → patch guarded by the read copy's resource version
//!         → stale copy ⇒ ClusterError::Conflict, retried next tick
//!
//! GC
//!     → StrategyRegistry::list (known strategy names per namespace)
//! ```
//!
//! # Design Decisions
//! - Traits at the seam so the decision core never depends on a transport
//! - Writes never mutate the caller's copy; the patched pod is returned
//! - No locking between components: races resolve by idempotent retry

pub mod api_server;
pub mod memory;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::pod::bookkeeping::{cut_patch, strip_patch, traffic_patch};
use crate::pod::{MetadataPatch, Pod, Selector, TrafficState};

pub use api_server::ApiServerClient;
pub use memory::MemoryCluster;
pub use registry::ConfigRegistry;

/// Errors returned by cluster collaborators.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The pod no longer exists.
    #[error("pod {0} not found")]
    NotFound(String),

    /// The write was made against a stale copy.
    #[error("conflict updating pod {0}: stale resource version")]
    Conflict(String),

    /// Transport or server failure.
    #[error("cluster request failed: {0}")]
    Request(String),

    /// Request exceeded its deadline.
    #[error("cluster request timed out after {0} seconds")]
    Timeout(u64),

    /// Response body did not have the expected shape.
    #[error("unexpected cluster response: {0}")]
    Decode(String),
}

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Read access to pods.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// Pods of `namespace` whose labels match `selector`.
    async fn list(&self, namespace: &str, selector: &Selector) -> ClusterResult<Vec<Pod>>;

    /// A single pod by name, `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        let pods = self.list(namespace, &Selector::new()).await?;
        Ok(pods.into_iter().find(|p| p.name() == name))
    }
}

/// Write access to pods.
#[async_trait]
pub trait PodActuator: Send + Sync {
    /// Apply `patch` on top of the caller's copy and return the updated pod.
    async fn patch(&self, pod: &Pod, patch: &MetadataPatch) -> ClusterResult<Pod>;

    /// Delete the pod.
    async fn delete(&self, pod: &Pod) -> ClusterResult<()>;

    async fn set_traffic_yes(&self, pod: &Pod) -> ClusterResult<Pod> {
        self.patch(pod, &traffic_patch(TrafficState::Yes)).await
    }

    async fn set_traffic_pause(&self, pod: &Pod) -> ClusterResult<Pod> {
        self.patch(pod, &traffic_patch(TrafficState::Pause)).await
    }

    /// Cut the pod: traffic `no`, owner set, `retryCount + 1`, `breakAt = now`.
    async fn set_traffic_no(
        &self,
        pod: &Pod,
        strategy: &str,
        now: DateTime<Utc>,
    ) -> ClusterResult<Pod> {
        self.patch(pod, &cut_patch(pod, strategy, now)).await
    }

    /// Remove every breaker label and annotation.
    async fn strip_bookkeeping(&self, pod: &Pod) -> ClusterResult<Pod> {
        self.patch(pod, &strip_patch()).await
    }
}

/// Known breaker strategies.
#[async_trait]
pub trait StrategyRegistry: Send + Sync {
    /// Names of the strategies currently defined in `namespace`.
    async fn list(&self, namespace: &str) -> ClusterResult<Vec<String>>;
}
