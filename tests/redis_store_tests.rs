//! Shared counter store tests against a real Redis using testcontainers.
//!
//! The container is started per test. These tests need Docker and are
//! ignored by default.
//!
//! Run with: `cargo test --test redis_store_tests -- --ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kb_gate::store::CounterStore;
use kb_gate::{AppState, Config, RedisCounterStore, build_router};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tower::ServiceExt;

const NOW: f64 = 1_700_000_000.0;

/// Redis container configuration
struct RedisContainer;

impl RedisContainer {
    const IMAGE: &'static str = "redis";
    const TAG: &'static str = "7-alpine";
    const PORT: u16 = 6379;

    /// Start a Redis container and return its connection URL
    async fn start() -> (ContainerAsync<GenericImage>, String) {
        let container = GenericImage::new(Self::IMAGE, Self::TAG)
            .with_exposed_port(Self::PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(Self::PORT)
            .await
            .expect("Failed to get Redis port");

        (container, format!("redis://127.0.0.1:{port}/0"))
    }
}

async fn open(url: &str) -> RedisCounterStore {
    RedisCounterStore::open(url, "rate_limit:", Duration::from_secs(2))
        .await
        .expect("Failed to open store")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_window_fills_and_reports_oldest() {
    let (_container, url) = RedisContainer::start().await;
    let store = open(&url).await;

    let first = store
        .check_and_consume("sustained:ip:a", 2, 60, NOW)
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.count, 1);

    let second = store
        .check_and_consume("sustained:ip:a", 2, 60, NOW + 5.0)
        .await
        .unwrap();
    assert!(second.allowed);
    assert_eq!(second.count, 2);

    let third = store
        .check_and_consume("sustained:ip:a", 2, 60, NOW + 10.0)
        .await
        .unwrap();
    assert!(!third.allowed);
    assert_eq!(third.count, 2);
    assert_eq!(third.oldest, Some(NOW));

    assert!(store.is_available());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_entries_leave_the_window() {
    let (_container, url) = RedisContainer::start().await;
    let store = open(&url).await;

    store
        .check_and_consume("burst:ip:a", 1, 1, NOW)
        .await
        .unwrap();
    assert_eq!(store.count("burst:ip:a", 1, NOW + 0.5).await.unwrap(), 1);

    // Score equal to the cutoff is outside the window
    assert_eq!(store.count("burst:ip:a", 1, NOW + 1.0).await.unwrap(), 0);
    assert!(
        store
            .check_and_consume("burst:ip:a", 1, 1, NOW + 1.0)
            .await
            .unwrap()
            .allowed
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_same_timestamp_entries_are_distinct() {
    let (_container, url) = RedisContainer::start().await;
    let store = open(&url).await;

    for expected in 1..=3 {
        let outcome = store
            .check_and_consume("sustained:ip:a", 10, 60, NOW)
            .await
            .unwrap();
        assert_eq!(outcome.count, expected);
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_consume_never_exceeds_limit() {
    let (_container, url) = RedisContainer::start().await;
    // Two connections, as two instances would have
    let stores = [Arc::new(open(&url).await), Arc::new(open(&url).await)];

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..40 {
        let store = stores[i % 2].clone();
        tasks.spawn(async move {
            store
                .check_and_consume("sustained:ip:shared", 5, 60, NOW + i as f64 * 0.001)
                .await
                .unwrap()
                .allowed
        });
    }

    let mut admitted = 0;
    while let Some(allowed) = tasks.join_next().await {
        if allowed.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 5);
    assert_eq!(
        stores[0]
            .count("sustained:ip:shared", 60, NOW + 1.0)
            .await
            .unwrap(),
        5
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_windows_are_shared_between_instances() {
    let (_container, url) = RedisContainer::start().await;

    let config = Config {
        rate_limit_requests: 2,
        ..Config::default()
    };
    let first: Arc<dyn CounterStore> = Arc::new(open(&url).await);
    let second: Arc<dyn CounterStore> = Arc::new(open(&url).await);
    let instance_a = AppState::new(config.clone(), Some(first));
    let instance_b = AppState::new(config, Some(second));

    let request = || {
        Request::get("/ready")
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap()
    };

    let app_a = build_router(instance_a.clone());
    let app_b = build_router(instance_b.clone());

    assert_eq!(
        app_a.clone().oneshot(request()).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app_b.clone().oneshot(request()).await.unwrap().status(),
        StatusCode::OK
    );
    // Quota consumed through instance B counts against instance A
    assert_eq!(
        app_a.oneshot(request()).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // Nothing was served from memory
    assert!(instance_a.limiter().fallback().is_empty());
    assert!(instance_b.limiter().fallback().is_empty());

    instance_a.shutdown().await;
    instance_b.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_falls_back_to_memory_when_redis_stops() {
    let (container, url) = RedisContainer::start().await;

    let store: Arc<dyn CounterStore> = Arc::new(open(&url).await);
    let state = AppState::new(
        Config {
            store_timeout: Duration::from_millis(200),
            ..Config::default()
        },
        Some(store),
    );
    let app = build_router(state.clone());

    let request = || {
        Request::get("/health")
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap()
    };
    let limited = || {
        Request::get("/ready")
            .header("x-forwarded-for", "198.51.100.7")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(
        app.clone().oneshot(limited()).await.unwrap().status(),
        StatusCode::OK
    );

    container.stop().await.expect("Failed to stop Redis container");

    // Still admitted, now against in-memory windows
    assert_eq!(
        app.clone().oneshot(limited()).await.unwrap().status(),
        StatusCode::OK
    );
    assert!(state.limiter().is_degraded());
    assert!(!state.limiter().fallback().is_empty());

    let health = app.oneshot(request()).await.unwrap();
    let bytes = axum::body::to_bytes(health.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["counter_store"], "redis");
    assert_eq!(body["counter_store_available"], false);

    state.shutdown().await;
}
