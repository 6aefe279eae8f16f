//! Integration tests for the step executor: retries, classification and
//! fallback handling against a mock target.

use loadtest_worker::auth::{setup_auth, AuthConfig};
use loadtest_worker::dsl::{HttpMethod, Step};
use loadtest_worker::errors::{DegradationStrategy, ErrorCategory, Severity};
use loadtest_worker::executor::{RetryPolicy, StepExecutor};
use loadtest_worker::result::SessionOutcome;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        retry_delay: Duration::from_millis(10),
        timeout_backoff_base: Duration::from_millis(10),
    }
}

fn create_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("Failed to create HTTP client")
}

fn executor(base_url: &str, max_attempts: u32) -> StepExecutor {
    StepExecutor::new(
        base_url,
        create_client(),
        Duration::from_secs(5),
        fast_policy(max_attempts),
    )
}

#[tokio::test]
async fn test_success_records_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 3)
        .execute(&Step::new(HttpMethod::Get, "/ping"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.successful, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.latencies.len(), 1);
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 2)
        .execute(&Step::new(HttpMethod::Get, "/flaky"), 4, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::FallbackEndpoint);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.successful, 0);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.latencies.is_empty());

    assert_eq!(outcome.errors.len(), 1);
    let record = &outcome.errors[0];
    assert_eq!(record.category, ErrorCategory::ServerError);
    assert_eq!(record.severity, Severity::High);
    assert_eq!(record.attempt, 3);
    assert_eq!(record.status_code, Some(500));
    assert_eq!(record.session_id, 4);
    assert!(record.endpoint.ends_with("/flaky"));
}

#[tokio::test]
async fn test_fallback_success_counts_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/primary"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/backup"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let step = Step::new(HttpMethod::Get, "/primary").with_fallback("/backup");
    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 2).execute(&step, 0, &mut outcome).await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.successful, 1);
    assert_eq!(outcome.failed, 0);
    // The primary failure is still reported.
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn test_fallback_failure_keeps_strategy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/cached"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let step = Step::new(HttpMethod::Post, "/orders").with_fallback("/orders/cached");
    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 1).execute(&step, 0, &mut outcome).await;

    assert_eq!(strategy, DegradationStrategy::FallbackEndpoint);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(401).set_body_string("login required"))
        .expect(1)
        .mount(&server)
        .await;

    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 3)
        .execute(&Step::new(HttpMethod::Get, "/account"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::TerminateJourney);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].category, ErrorCategory::AuthError);
    assert_eq!(outcome.errors[0].attempt, 1);
    assert_eq!(outcome.errors[0].message, "login required");
    assert!(!outcome.errors[0].retry_eligible);
}

#[tokio::test]
async fn test_not_found_continues() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 3)
        .execute(&Step::new(HttpMethod::Delete, "/gone"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors[0].category, ErrorCategory::HttpError);
    assert_eq!(outcome.errors[0].message, "HTTP 404");
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/warmup"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/warmup"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 3)
        .execute(&Step::new(HttpMethod::Get, "/warmup"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.successful, 1);
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn test_timeout_is_retried_then_degrades() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
        .expect(2)
        .mount(&server)
        .await;

    let executor = StepExecutor::new(
        server.uri(),
        create_client(),
        Duration::from_millis(100),
        fast_policy(1),
    );
    let mut outcome = SessionOutcome::new();
    let strategy = executor
        .execute(&Step::new(HttpMethod::Get, "/slow"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::FallbackEndpoint);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].category, ErrorCategory::Timeout);
    assert_eq!(outcome.errors[0].attempt, 2);
    assert_eq!(outcome.errors[0].status_code, None);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Nothing listens on port 1.
    let mut outcome = SessionOutcome::new();
    let strategy = executor("http://127.0.0.1:1", 1)
        .execute(&Step::new(HttpMethod::Get, "/"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::FallbackEndpoint);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors[0].category, ErrorCategory::Network);
    assert_eq!(outcome.errors[0].attempt, 2);
}

#[tokio::test]
async fn test_payload_is_sent_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/cart/1"))
        .and(body_json(json!({"qty": 2})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let step = Step::new(HttpMethod::Put, "/cart/1").with_payload(json!({"qty": 2}));
    let mut outcome = SessionOutcome::new();
    let strategy = executor(&server.uri(), 0).execute(&step, 0, &mut outcome).await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.successful, 1);
}

#[tokio::test]
async fn test_bearer_credentials_are_injected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_client();
    let auth = AuthConfig::Bearer {
        token: "s3cret".to_string(),
    };
    let credentials = setup_auth(&client, &server.uri(), &auth, Duration::from_secs(5)).await;
    let executor = StepExecutor::new(server.uri(), client, Duration::from_secs(5), fast_policy(0))
        .with_credentials(credentials);

    let mut outcome = SessionOutcome::new();
    executor
        .execute(&Step::new(HttpMethod::Get, "/me"), 0, &mut outcome)
        .await;
    assert_eq!(outcome.successful, 1);
}

#[tokio::test]
async fn test_absolute_step_url_bypasses_base() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let absolute = format!("{}/elsewhere", server.uri());
    let mut outcome = SessionOutcome::new();
    executor("http://127.0.0.1:1", 0)
        .execute(&Step::new(HttpMethod::Get, absolute), 0, &mut outcome)
        .await;
    assert_eq!(outcome.successful, 1);
}
