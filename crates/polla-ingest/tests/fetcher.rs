//! HTTP fetcher behavior against a local mock server: robots.txt, 429
//! backoff, status classification.

use std::sync::Arc;
use std::time::Duration;

use polla_ingest::fetch::{Fetch, HostRateLimiter, HttpFetcher, NoopRateLimiter};
use polla_ingest::FetchError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UA: &str = "polla-ingest/0.1 (+https://github.com/polla-transparency)";
const TIMEOUT: Duration = Duration::from_secs(5);

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Arc::new(NoopRateLimiter), Duration::from_millis(20)).unwrap()
}

async fn robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ── robots.txt ──

#[tokio::test]
async fn test_robots_disallow_blocks() {
    let server = MockServer::start().await;
    robots(&server, "User-agent: *\nDisallow: /privado/\n").await;

    let url = format!("{}/privado/pozo", server.uri());
    let err = fetcher().fetch(&url, UA, TIMEOUT).await.unwrap_err();
    assert_eq!(err, FetchError::Blocked(url));
}

#[tokio::test]
async fn test_robots_group_for_our_agent_wins() {
    let server = MockServer::start().await;
    robots(
        &server,
        "User-agent: *\nDisallow: /\n\nUser-agent: polla-ingest\nAllow: /pozo\nDisallow: /\n",
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
        .mount(&server)
        .await;

    let f = fetcher();
    let fetched = f.fetch(&format!("{}/pozo", server.uri()), UA, TIMEOUT).await.unwrap();
    assert_eq!(fetched.body, "<p>ok</p>");
    let err = f
        .fetch(&format!("{}/otra", server.uri()), UA, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Blocked(_)));
}

#[tokio::test]
async fn test_missing_robots_allows_and_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .and(header("user-agent", UA))
        .and(header("accept-language", "es-CL,es;q=0.9"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>sorteo 5323</h1>"))
        .expect(2)
        .mount(&server)
        .await;

    let f = fetcher();
    let url = format!("{}/pozo", server.uri());
    let first = f.fetch(&url, UA, TIMEOUT).await.unwrap();
    let second = f.fetch(&url, UA, TIMEOUT).await.unwrap();
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.content_hash.len(), 64);
    assert_eq!(first.user_agent, UA);
    // `expect` counts are verified when the server drops.
}

#[tokio::test]
async fn test_forbidden_robots_denies_all() {
    for status in [401, 403] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pozo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pozo"))
            .expect(0)
            .mount(&server)
            .await;

        let url = format!("{}/pozo", server.uri());
        let err = fetcher().fetch(&url, UA, TIMEOUT).await.unwrap_err();
        assert_eq!(err, FetchError::Blocked(url), "robots status {status}");
    }
}

#[tokio::test]
async fn test_robots_server_error_denies_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pozo"))
        .expect(0)
        .mount(&server)
        .await;

    let url = format!("{}/pozo", server.uri());
    let err = fetcher().fetch(&url, UA, TIMEOUT).await.unwrap_err();
    assert_eq!(err, FetchError::Blocked(url));
}

#[tokio::test]
async fn test_robots_gone_allows_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pozo"))
        .mount(&server)
        .await;

    let fetched = fetcher()
        .fetch(&format!("{}/pozo", server.uri()), UA, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(fetched.body, "pozo");
}

// ── Status handling ──

#[tokio::test]
async fn test_429_then_success_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pozo"))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = fetcher()
        .fetch(&format!("{}/pozo", server.uri()), UA, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(fetched.body, "pozo");
}

#[tokio::test]
async fn test_429_twice_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}/pozo", server.uri());
    let err = fetcher().fetch(&url, UA, TIMEOUT).await.unwrap_err();
    assert_eq!(err, FetchError::RateLimited(url));
}

#[tokio::test]
async fn test_server_error_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&format!("{}/pozo", server.uri()), UA, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::HttpError(503));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(
            &format!("{}/pozo", server.uri()),
            UA,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout(_)));
}

// ── Pacing ──

#[tokio::test]
async fn test_host_limiter_spaces_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pozo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pozo"))
        .mount(&server)
        .await;

    let limiter = Arc::new(HostRateLimiter::new(Duration::from_millis(150)));
    let f = HttpFetcher::new(limiter, Duration::from_millis(20)).unwrap();
    let url = format!("{}/pozo", server.uri());

    let start = std::time::Instant::now();
    // robots.txt, then two page requests: three slots on one host.
    f.fetch(&url, UA, TIMEOUT).await.unwrap();
    f.fetch(&url, UA, TIMEOUT).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
}
