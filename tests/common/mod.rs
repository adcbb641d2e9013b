//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use pod_breaker::config::{
    ActivatorConfig, BreakerStrategyConfig, ControllerConfig, CustomServiceConfig,
    DetectorConfig, GcConfig, ServiceConfig,
};
use pod_breaker::pod::bookkeeping::{
    format_timestamp, ANNOTATION_BREAK_AT, ANNOTATION_RETRY_COUNT,
};
use pod_breaker::pod::traffic::{LABEL_STRATEGY, LABEL_TRAFFIC};
use pod_breaker::pod::{Pod, TrafficState};
use pod_breaker::query::{MetricSource, QueryError, Sample};

pub const NAMESPACE: &str = "shop";
pub const APP: &str = "checkout";

/// Service selecting `app=checkout` pods in `shop`.
pub fn service(strategies: Vec<BreakerStrategyConfig>) -> ServiceConfig {
    ServiceConfig {
        name: APP.to_string(),
        namespace: NAMESPACE.to_string(),
        selector: BTreeMap::from([("app".to_string(), APP.to_string())]),
        strategies,
        default_activator: ActivatorConfig::default(),
        gc: GcConfig::default(),
    }
}

pub fn strategy(name: &str, detector: DetectorConfig) -> BreakerStrategyConfig {
    BreakerStrategyConfig {
        name: name.to_string(),
        evaluation_period_secs: 10,
        min_available_count: 0,
        min_available_ratio: 0,
        detector,
        activator: None,
    }
}

/// Configuration holding the service with one custom-service strategy per name.
pub fn strategies_config(names: &[&str]) -> ControllerConfig {
    let strategies = names
        .iter()
        .map(|name| {
            strategy(
                name,
                DetectorConfig::CustomService(CustomServiceConfig {
                    url: "http://127.0.0.1:9/pods".to_string(),
                    timeout_secs: 1,
                }),
            )
        })
        .collect();
    ControllerConfig {
        services: vec![service(strategies)],
        ..Default::default()
    }
}

/// A running, ready pod of the service receiving traffic.
pub fn service_pod(name: &str) -> Pod {
    let mut pod = Pod::new(NAMESPACE, name);
    pod.metadata.labels.insert("app".into(), APP.into());
    pod.metadata.labels.insert(LABEL_TRAFFIC.into(), TrafficState::Yes.to_string());
    pod
}

/// A pod cut by `strategy` at `break_at`.
pub fn cut_pod(name: &str, strategy: &str, break_at: DateTime<Utc>, retry_count: u32) -> Pod {
    let mut pod = service_pod(name);
    pod.metadata.labels.insert(LABEL_TRAFFIC.into(), TrafficState::No.to_string());
    pod.metadata.labels.insert(LABEL_STRATEGY.into(), strategy.into());
    pod.metadata
        .annotations
        .insert(ANNOTATION_BREAK_AT.into(), format_timestamp(break_at));
    pod.metadata
        .annotations
        .insert(ANNOTATION_RETRY_COUNT.into(), retry_count.to_string());
    pod
}

/// A pod parked by `strategy`'s activator.
pub fn paused_pod(name: &str, strategy: &str) -> Pod {
    let mut pod = service_pod(name);
    pod.metadata.labels.insert(LABEL_TRAFFIC.into(), TrafficState::Pause.to_string());
    pod.metadata.labels.insert(LABEL_STRATEGY.into(), strategy.into());
    pod
}

/// Metric source answering each query with a fixed vector.
#[derive(Default)]
pub struct ScriptedMetrics {
    answers: HashMap<String, Vec<Sample>>,
}

impl ScriptedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, query: &str, samples: Vec<Sample>) -> Self {
        self.answers.insert(query.to_string(), samples);
        self
    }
}

#[async_trait]
impl MetricSource for ScriptedMetrics {
    async fn query(&self, query: &str, _at: DateTime<Utc>) -> Result<Vec<Sample>, QueryError> {
        self.answers
            .get(query)
            .cloned()
            .ok_or_else(|| QueryError::Rejected(format!("unknown query {}", query)))
    }
}

/// Sample of a discrete query: one (pod, code) pair with its count.
pub fn code_sample(pod: &str, code: &str, count: f64) -> Sample {
    Sample::new([("pod", pod), ("code", code)], count)
}

/// Start a programmable mock HTTP server on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            409 => "409 Conflict",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}
