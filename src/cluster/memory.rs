//! In-memory cluster.
//!
//! Holds pods in a concurrent map and enforces resource versions the same
//! way the API server does, so stale writes surface as conflicts.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::cluster::{ClusterError, ClusterResult, PodActuator, PodLister};
use crate::pod::{MetadataPatch, Pod, Selector};

#[derive(Debug, Default)]
pub struct MemoryCluster {
    pods: DashMap<String, Pod>,
    version: AtomicU64,
    failing: DashSet<String>,
    deleted: DashSet<String>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pod, assigning a fresh resource version.
    pub fn insert(&self, mut pod: Pod) -> Pod {
        pod.metadata.resource_version = Some(self.next_version());
        self.pods.insert(pod.key(), pod.clone());
        pod
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .get(&format!("{}/{}", namespace, name))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Make every write to `namespace/name` fail with a request error.
    pub fn fail_writes(&self, key: &str) {
        self.failing.insert(key.to_string());
    }

    pub fn was_deleted(&self, key: &str) -> bool {
        self.deleted.contains(key)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn check_writable(&self, key: &str) -> ClusterResult<()> {
        if self.failing.contains(key) {
            return Err(ClusterError::Request(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl PodLister for MemoryCluster {
    async fn list(&self, namespace: &str, selector: &Selector) -> ClusterResult<Vec<Pod>> {
        let mut pods: Vec<Pod> = self
            .pods
            .iter()
            .filter(|r| r.value().namespace() == namespace)
            .filter(|r| selector.matches(&r.value().metadata.labels))
            .map(|r| r.value().clone())
            .collect();
        pods.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(pods)
    }

    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Option<Pod>> {
        Ok(MemoryCluster::get(self, namespace, name))
    }
}

#[async_trait]
impl PodActuator for MemoryCluster {
    async fn patch(&self, pod: &Pod, patch: &MetadataPatch) -> ClusterResult<Pod> {
        let key = pod.key();
        self.check_writable(&key)?;

        let mut stored = self
            .pods
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(key.clone()))?;

        if pod.metadata.resource_version.is_some()
            && pod.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(ClusterError::Conflict(key));
        }

        patch.apply_to(&mut stored.metadata);
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn delete(&self, pod: &Pod) -> ClusterResult<()> {
        let key = pod.key();
        self.check_writable(&key)?;
        self.pods
            .remove(&key)
            .ok_or_else(|| ClusterError::NotFound(key.clone()))?;
        self.deleted.insert(key);
        Ok(())
    }
}
