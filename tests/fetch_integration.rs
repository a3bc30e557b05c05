//! Integration tests for the politeness layer: retries, `Retry-After`,
//! circuit breaking and rate limiting against a mock server.

use std::time::{Duration, Instant};

use docmirror_core::fetch::CircuitState;
use docmirror_core::{
    AdaptiveRateLimiter, CircuitBreaker, CrawlError, ErrorCategory, HttpClient, RetryController,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> HttpClient {
    HttpClient::new(Duration::from_secs(5))
}

fn quick_retry(max_retries: u32) -> RetryController {
    RetryController::new(
        max_retries,
        Duration::from_millis(5),
        Duration::from_secs(2),
    )
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_retry_recovers_from_transient_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client();
    let url = format!("{}/page", server.uri());
    let page = quick_retry(3)
        .run("fetch_page", || client.get_page(&url))
        .await
        .unwrap();

    assert_eq!(page.body, "ok");
}

#[tokio::test]
async fn test_retry_gives_up_on_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client();
    let url = format!("{}/missing", server.uri());
    let err = quick_retry(5)
        .run("fetch_page", || client.get_page(&url))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Network);
    assert!(!err.indicates_unhealthy_target());
}

#[tokio::test]
async fn test_retry_honors_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ready"))
        .mount(&server)
        .await;

    let client = client();
    let url = format!("{}/busy", server.uri());
    let started = Instant::now();
    let page = quick_retry(3)
        .run("fetch_page", || client.get_page(&url))
        .await
        .unwrap();

    assert_eq!(page.body, "ready");
    assert!(started.elapsed() >= Duration::from_secs(1));
}

// ==================== Circuit Breaker Tests ====================

#[tokio::test]
async fn test_breaker_opens_and_stops_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client();
    let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    let url = format!("{}/down", server.uri());

    for _ in 0..2 {
        let result = breaker
            .call(&url, || async {
                client.get_page(&url).await.map_err(CrawlError::from)
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    let refused = breaker
        .call(&url, || async {
            client.get_page(&url).await.map_err(CrawlError::from)
        })
        .await
        .unwrap_err();
    assert!(matches!(refused, CrawlError::CircuitOpen { failures: 2, .. }));
}

#[tokio::test]
async fn test_breaker_wrapping_retry_counts_one_failure_per_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = client();
    let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    let retry = quick_retry(3);
    let url = format!("{}/flaky", server.uri());

    let err = breaker
        .call(&url, || retry.run("fetch_page", || client.get_page(&url)))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::RetryExhausted);
    assert_eq!(breaker.failures().await, 1);
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

// ==================== Rate Limiter Tests ====================

#[tokio::test]
async fn test_rate_limiter_speeds_up_for_fast_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
        .mount(&server)
        .await;

    let client = client();
    let limiter = AdaptiveRateLimiter::new(
        Duration::from_millis(40),
        Duration::from_millis(5),
        Duration::from_millis(200),
        2.0,
    );
    let url = format!("{}/fast", server.uri());

    for _ in 0..3 {
        limiter.wait().await;
        let page = client.get_page(&url).await.unwrap();
        limiter.update(page.latency).await;
    }

    assert!(limiter.current_delay().await < Duration::from_millis(40));
}
