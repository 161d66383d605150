//! Integration tests for proxy pool loading, probing and executor feedback.
//!
//! Unreachable proxies use closed local ports so probes fail fast without
//! leaving the machine.

use std::sync::Arc;
use std::time::Duration;

use sharelink_core::network::{HttpTimeouts, RequestError, RequestExecutor, RequestSpec, RetryPolicy};
use sharelink_core::pool::{IdentityPool, ProxyPool, ProxyPoolConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;

use support::socket_guard::start_mock_server_or_skip;

fn pool_config(mock_server: &MockServer) -> ProxyPoolConfig {
    ProxyPoolConfig {
        enabled: true,
        static_proxies: Vec::new(),
        sources: Vec::new(),
        probe_url: format!("{}/health", mock_server.uri()),
        probe_limit: 10,
        probe_timeout: Duration::from_secs(2),
        cooldown: Duration::from_secs(5),
    }
}

// ==================== Initialization Tests ====================

#[tokio::test]
async fn test_initialize_merges_static_and_feed_entries() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/feed.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "127.0.0.1:1\nhttp://127.0.0.1:2\nnot a proxy\n\n127.0.0.1:1\n",
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::new(ProxyPoolConfig {
        static_proxies: vec!["socks5://127.0.0.1:3".to_string()],
        sources: vec![format!("{}/feed.txt", mock_server.uri())],
        probe_limit: 1,
        ..pool_config(&mock_server)
    });
    pool.initialize().await;

    let stats = pool.stats().await;
    assert_eq!(stats.total, 3);
    // Only the first (static) endpoint was probed, and its port is closed.
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.alive, 2);

    let snapshot = pool.snapshot().await;
    assert_eq!(snapshot[0].address(), "socks5://127.0.0.1:3");
    assert!(!snapshot[0].is_alive());
    assert_eq!(snapshot[0].failures(), 1);
    assert_eq!(snapshot[1].address(), "http://127.0.0.1:1");
}

#[tokio::test]
async fn test_initialize_ignores_failing_feed() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::new(ProxyPoolConfig {
        static_proxies: vec!["127.0.0.1:4".to_string()],
        sources: vec![format!("{}/gone.txt", mock_server.uri())],
        probe_limit: 0,
        ..pool_config(&mock_server)
    });
    pool.initialize().await;

    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.alive, 1);
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/feed.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("127.0.0.1:5\n"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::new(ProxyPoolConfig {
        sources: vec![format!("{}/feed.txt", mock_server.uri())],
        probe_limit: 0,
        ..pool_config(&mock_server)
    });
    pool.initialize().await;
    pool.initialize().await;

    assert_eq!(pool.stats().await.total, 1);
}

#[tokio::test]
async fn test_disabled_pool_fetches_nothing() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("127.0.0.1:6\n"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let pool = ProxyPool::new(ProxyPoolConfig {
        enabled: false,
        sources: vec![format!("{}/feed.txt", mock_server.uri())],
        ..pool_config(&mock_server)
    });
    pool.initialize().await;

    assert_eq!(pool.stats().await.total, 0);
    assert_eq!(pool.select("terabox.com").await, None);
}

#[tokio::test]
async fn test_reprobe_keeps_unreachable_endpoints_dead() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let pool = ProxyPool::new(ProxyPoolConfig {
        static_proxies: vec!["127.0.0.1:7".to_string()],
        ..pool_config(&mock_server)
    });
    pool.initialize().await;
    assert_eq!(pool.stats().await.dead, 1);

    assert_eq!(pool.reprobe().await, 0);
    assert_eq!(pool.stats().await.dead, 1);
}

// ==================== Executor Feedback Tests ====================

#[tokio::test]
async fn test_executor_reports_each_failed_attempt_to_proxy() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let pool = Arc::new(ProxyPool::new(ProxyPoolConfig {
        static_proxies: vec!["127.0.0.1:8".to_string()],
        ..pool_config(&mock_server)
    }));
    pool.add_endpoints(&pool.config().static_proxies).await;

    let executor = RequestExecutor::new(
        Arc::clone(&pool),
        Arc::new(IdentityPool::new(2)),
        RetryPolicy::new(2, Duration::from_millis(5)),
        HttpTimeouts::uniform(Duration::from_secs(2)),
    )
    .unwrap();

    let err = executor
        .execute(&RequestSpec::get(format!("{}/api", mock_server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::RetriesExhausted { attempts: 3, .. }));

    let snapshot = pool.snapshot().await;
    assert_eq!(snapshot[0].failures(), 3);
    assert_eq!(snapshot[0].successes(), 0);
}

/// An executor whose only proxy is the mock server acting as a plain-HTTP proxy.
async fn proxied_through_mock(mock_server: &MockServer, max_retries: u32) -> (Arc<ProxyPool>, RequestExecutor) {
    let pool = Arc::new(ProxyPool::new(pool_config(mock_server)));
    assert_eq!(pool.add_endpoints([mock_server.uri()]).await, 1);
    let executor = RequestExecutor::new(
        Arc::clone(&pool),
        Arc::new(IdentityPool::new(2)),
        RetryPolicy::new(max_retries, Duration::from_millis(5)),
        HttpTimeouts::uniform(Duration::from_secs(5)),
    )
    .unwrap();
    (pool, executor)
}

#[tokio::test]
async fn test_rate_limited_responses_through_proxy_are_not_blamed() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/list"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (pool, executor) = proxied_through_mock(&mock_server, 2).await;
    let err = executor
        .execute(&RequestSpec::get("http://share.example/api/list"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::RetriesExhausted {
            attempts: 3,
            last_status: Some(429),
            ..
        }
    ));

    // Every attempt went through the proxy, in absolute form.
    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|request| request.url.host_str() == Some("share.example")));

    let endpoint = &pool.snapshot().await[0];
    assert_eq!(endpoint.failures(), 0);
    assert_eq!(endpoint.successes(), 0);
    assert!(endpoint.is_alive());
}

#[tokio::test]
async fn test_server_errors_through_proxy_are_blamed() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/list"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (pool, executor) = proxied_through_mock(&mock_server, 0).await;
    let err = executor
        .execute(&RequestSpec::get("http://share.example/api/list"))
        .await
        .unwrap_err();
    assert_eq!(err.last_status(), Some(502));
    assert_eq!(pool.snapshot().await[0].failures(), 1);
}

#[tokio::test]
async fn test_direct_request_bypasses_proxy_pool() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pool = Arc::new(ProxyPool::new(pool_config(&mock_server)));
    pool.add_endpoints(["127.0.0.1:9"]).await;
    let executor = RequestExecutor::new(
        Arc::clone(&pool),
        Arc::new(IdentityPool::new(2)),
        RetryPolicy::no_retries(),
        HttpTimeouts::uniform(Duration::from_secs(2)),
    )
    .unwrap();

    let response = executor
        .execute(
            &RequestSpec::post_json(
                format!("{}/relay", mock_server.uri()),
                serde_json::json!({"url": "x"}),
            )
            .direct(),
        )
        .await
        .unwrap();

    assert_eq!(response.proxy, None);
    assert_eq!(pool.snapshot().await[0].failures(), 0);
}
