//! Integration tests for journey execution, auth setup and termination.

use loadtest_worker::auth::AuthConfig;
use loadtest_worker::dsl::{parse_dsl, HttpMethod, Step};
use loadtest_worker::errors::{DegradationStrategy, ErrorCategory};
use loadtest_worker::executor::RetryPolicy;
use loadtest_worker::journey::JourneyRunner;
use loadtest_worker::result::SessionOutcome;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner(base_url: &str, auth: AuthConfig, max_attempts: u32) -> JourneyRunner {
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("Failed to create HTTP client");
    JourneyRunner::new(
        client,
        base_url,
        auth,
        Duration::from_secs(5),
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_millis(10),
            timeout_backoff_base: Duration::from_millis(10),
        },
    )
}

async fn mount_ok(server: &MockServer, http_method: &str, route: &str, times: u64) {
    Mock::given(method(http_method))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_auth_failure_terminates_remaining_work() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", "/home", 1).await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "GET", "/after", 0).await;
    mount_ok(&server, "GET", "/next-journey", 0).await;

    let plan = parse_dsl(
        "journey: first\n- GET /home\n- GET /secure\n- GET /after\nend\njourney: second\n- GET /next-journey\nend",
    );

    let mut outcome = SessionOutcome::new();
    let summary = runner(&server.uri(), AuthConfig::None, 2)
        .run(&plan.journeys, 0, &mut outcome)
        .await;

    assert!(summary.terminated);
    assert_eq!(summary.steps_executed, 2);
    assert_eq!(outcome.requests, 2);
    assert_eq!(outcome.successful, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors[0].category, ErrorCategory::AuthError);
}

#[tokio::test]
async fn test_repeat_runs_steps_in_order() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", "/a", 3).await;
    mount_ok(&server, "POST", "/b", 3).await;
    mount_ok(&server, "GET", "/c", 1).await;

    let plan = parse_dsl(
        "journey: loop\nrepeat: 3\n- GET /a\n- POST /b {\"n\": 1}\nend\njourney: once\n- GET /c\nend",
    );

    let mut outcome = SessionOutcome::new();
    let summary = runner(&server.uri(), AuthConfig::None, 0)
        .run(&plan.journeys, 1, &mut outcome)
        .await;

    assert!(!summary.terminated);
    assert_eq!(summary.steps_executed, 7);
    assert_eq!(outcome.requests, 7);
    assert_eq!(outcome.successful, 7);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_journey() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    mount_ok(&server, "GET", "/fine", 1).await;

    let plan = parse_dsl("journey: j\n- GET /broken\n- GET /fine\nend");

    let mut outcome = SessionOutcome::new();
    let summary = runner(&server.uri(), AuthConfig::None, 1)
        .run(&plan.journeys, 0, &mut outcome)
        .await;

    assert!(!summary.terminated);
    assert_eq!(outcome.requests, 2);
    assert_eq!(outcome.successful, 1);
    assert_eq!(outcome.failed, 1);
}

#[tokio::test]
async fn test_session_login_sets_cookie_for_journey() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({"username": "alice", "password": "pw"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=abc123; Path=/")
                .set_body_json(json!({"token": "ignored"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("cookie", "sid=abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let plan = parse_dsl("journey: j\n- GET /profile\nend");
    let auth = AuthConfig::Session {
        username: "alice".to_string(),
        password: "pw".to_string(),
        login_endpoint: None,
    };

    let mut outcome = SessionOutcome::new();
    runner(&server.uri(), auth, 0)
        .run(&plan.journeys, 0, &mut outcome)
        .await;

    assert_eq!(outcome.successful, 1);
}

#[tokio::test]
async fn test_session_login_runs_once_per_journey() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "sid=abc123; Path=/"))
        .expect(2)
        .mount(&server)
        .await;
    mount_ok(&server, "GET", "/cart", 2).await;
    mount_ok(&server, "GET", "/orders", 1).await;

    let plan = parse_dsl("journey: shop
repeat: 2
- GET /cart
end
journey: history
- GET /orders
end");
    let auth = AuthConfig::Session {
        username: "alice".to_string(),
        password: "pw".to_string(),
        login_endpoint: None,
    };

    let mut outcome = SessionOutcome::new();
    let summary = runner(&server.uri(), auth, 0)
        .run(&plan.journeys, 0, &mut outcome)
        .await;

    assert_eq!(summary.steps_executed, 3);
    assert_eq!(outcome.requests, 3);
    assert_eq!(outcome.successful, 3);
}

#[tokio::test]
async fn test_custom_login_endpoint_and_failed_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/signin"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_ok(&server, "GET", "/public", 1).await;

    let plan = parse_dsl("journey: j\n- GET /public\nend");
    let auth = AuthConfig::Session {
        username: "bob".to_string(),
        password: "pw".to_string(),
        login_endpoint: Some("/auth/signin".to_string()),
    };

    let mut outcome = SessionOutcome::new();
    let summary = runner(&server.uri(), auth, 0)
        .run(&plan.journeys, 0, &mut outcome)
        .await;

    // A failed login is not counted as a step and does not abort the journey.
    assert!(!summary.terminated);
    assert_eq!(outcome.requests, 1);
    assert_eq!(outcome.successful, 1);
}

#[tokio::test]
async fn test_basic_auth_on_single_step() {
    let server = MockServer::start().await;
    // "user:pass" in base64
    Mock::given(method("GET"))
        .and(path("/basic"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let auth = AuthConfig::Basic {
        username: "user".to_string(),
        password: "pass".to_string(),
    };

    let mut outcome = SessionOutcome::new();
    let strategy = runner(&server.uri(), auth, 0)
        .run_step(&Step::new(HttpMethod::Get, "/basic"), 0, &mut outcome)
        .await;

    assert_eq!(strategy, DegradationStrategy::ContinueJourney);
    assert_eq!(outcome.successful, 1);
}
