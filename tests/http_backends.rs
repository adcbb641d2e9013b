//! Detectors and clients against mock HTTP backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use pod_breaker::breaker::{Breaker, BreakerError};
use pod_breaker::cluster::{ApiServerClient, ClusterError, MemoryCluster, PodActuator, PodLister};
use pod_breaker::config::{
    ClusterConfig, ContinuousValueDeviationConfig, CustomServiceConfig, DetectorConfig,
    MetricSourceConfig,
};
use pod_breaker::pod::{PodList, Selector, TrafficState};
use pod_breaker::query::{MetricSource, PrometheusSource};

mod common;
use common::{service, service_pod, start_programmable_backend, strategy, NAMESPACE};

fn verdict_body(names: &[&str]) -> String {
    let list = PodList {
        items: names.iter().map(|n| service_pod(n)).collect(),
    };
    serde_json::to_string(&list).unwrap()
}

fn custom(addr: std::net::SocketAddr) -> DetectorConfig {
    DetectorConfig::CustomService(CustomServiceConfig {
        url: format!("http://{}/verdict", addr),
        timeout_secs: 2,
    })
}

#[tokio::test]
async fn test_custom_verdict_is_cut_within_quota() {
    let body = verdict_body(&["a", "b"]);
    let addr = start_programmable_backend(move || {
        let body = body.clone();
        async move { (200, body) }
    })
    .await;

    let cluster = Arc::new(MemoryCluster::new());
    for name in ["a", "b", "c", "d"] {
        cluster.insert(service_pod(name));
    }

    let mut strat = strategy("verdict", custom(addr));
    strat.min_available_count = 3;
    let breaker = Breaker::new(&service(vec![]), &strat, cluster.clone(), cluster.clone(), None)
        .unwrap();

    let report = breaker
        .tick(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(report.violators, 2);
    assert_eq!(report.cut, 1);
    assert_eq!(
        cluster.get(NAMESPACE, "a").unwrap().traffic(),
        Some(TrafficState::No)
    );
    assert_eq!(
        cluster.get(NAMESPACE, "b").unwrap().traffic(),
        Some(TrafficState::Yes)
    );
}

#[tokio::test]
async fn test_custom_verdict_failure_aborts_tick() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = start_programmable_backend(move || {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (503, "unavailable".to_string())
        }
    })
    .await;

    let cluster = Arc::new(MemoryCluster::new());
    cluster.insert(service_pod("a"));
    let breaker = Breaker::new(
        &service(vec![]),
        &strategy("verdict", custom(addr)),
        cluster.clone(),
        cluster.clone(),
        None,
    )
    .unwrap();

    let err = breaker.tick(Utc::now()).await.unwrap_err();
    assert!(matches!(err, BreakerError::Detector(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        cluster.get(NAMESPACE, "a").unwrap().traffic(),
        Some(TrafficState::Yes)
    );
}

#[tokio::test]
async fn test_prometheus_vector_feeds_continuous_detector() {
    let body = r#"{"status":"success","data":{"resultType":"vector","result":[
        {"metric":{"pod":"a"},"value":[1714564800,"1.01"]},
        {"metric":{"pod":"b"},"value":[1714564800,"2.5"]}
    ]}}"#
        .to_string();
    let addr = start_programmable_backend(move || {
        let body = body.clone();
        async move { (200, body) }
    })
    .await;

    let source: Arc<dyn MetricSource> = Arc::new(
        PrometheusSource::new(&MetricSourceConfig {
            url: format!("http://{}/", addr),
            timeout_secs: 2,
        })
        .unwrap(),
    );

    let cluster = Arc::new(MemoryCluster::new());
    cluster.insert(service_pod("a"));
    cluster.insert(service_pod("b"));

    let detector = DetectorConfig::ContinuousValueDeviation(ContinuousValueDeviationConfig {
        query: "latency_ratio".to_string(),
        pod_name_key: "pod".to_string(),
        max_deviation_percent: 50.0,
    });
    let breaker = Breaker::new(
        &service(vec![]),
        &strategy("latency", detector),
        cluster.clone(),
        cluster.clone(),
        Some(source),
    )
    .unwrap();

    let report = breaker.tick(Utc::now()).await.unwrap();
    assert_eq!(report.cut, 1);
    assert_eq!(
        cluster.get(NAMESPACE, "b").unwrap().traffic(),
        Some(TrafficState::No)
    );
}

fn api_client(addr: std::net::SocketAddr) -> ApiServerClient {
    ApiServerClient::new(&ClusterConfig {
        api_url: format!("http://{}/", addr),
        token_path: None,
        accept_invalid_certs: false,
        request_timeout_secs: 2,
    })
    .unwrap()
}

#[tokio::test]
async fn test_api_server_list_and_patch() {
    let mut patched = service_pod("a");
    patched.metadata.resource_version = Some("8".to_string());
    patched
        .metadata
        .labels
        .insert("pod-breaker/traffic".to_string(), "pause".to_string());
    let list = verdict_body(&["a"]);
    let single = serde_json::to_string(&patched).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = start_programmable_backend(move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        let body = if n == 0 { list.clone() } else { single.clone() };
        async move { (200, body) }
    })
    .await;

    let client = api_client(addr);
    let pods = client
        .list(NAMESPACE, &Selector::new().with_label("app", "checkout"))
        .await
        .unwrap();
    assert_eq!(pods.len(), 1);

    let updated = client.set_traffic_pause(&pods[0]).await.unwrap();
    assert_eq!(updated.traffic(), Some(TrafficState::Pause));
    assert_eq!(updated.metadata.resource_version.as_deref(), Some("8"));
}

#[tokio::test]
async fn test_api_server_conflict_and_missing_pod() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = start_programmable_backend(move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                (409, "{}".to_string())
            } else {
                (404, "{}".to_string())
            }
        }
    })
    .await;

    let client = api_client(addr);
    let err = client.set_traffic_yes(&service_pod("a")).await.unwrap_err();
    assert!(matches!(err, ClusterError::Conflict(_)));

    let missing = client.get(NAMESPACE, "gone").await.unwrap();
    assert!(missing.is_none());
}
