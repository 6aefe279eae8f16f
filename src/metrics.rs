use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "loadtest_worker".to_string());

    // === Step Request Metrics ===

    pub static ref STEP_REQUESTS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("step_requests_total", "Total number of DSL step invocations")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref STEP_FAILURES_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("step_failures_total", "Failed request attempts by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "Latency of successful step requests in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref DEGRADATION_DECISIONS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("degradation_decisions_total", "Degradation strategies chosen after exhausted retries")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["strategy"]
        ).unwrap();

    // === Population Metrics ===

    pub static ref ACTIVE_SESSIONS: Gauge =
        Gauge::with_opts(
            Opts::new("active_sessions", "Number of virtual users or sessions currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TESTS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("tests_total", "Test runs processed by this worker")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status"]  // status: completed, failed
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    prometheus::default_registry().register(Box::new(STEP_REQUESTS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(STEP_FAILURES_BY_CATEGORY.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    prometheus::default_registry().register(Box::new(DEGRADATION_DECISIONS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(ACTIVE_SESSIONS.clone()))?;
    prometheus::default_registry().register(Box::new(TESTS_TOTAL.clone()))?;

    Ok(())
}

fn encode(registry: &Arc<Mutex<Registry>>) -> Result<(Vec<u8>, String), String> {
    let encoder = TextEncoder::new();
    let metric_families = registry
        .lock()
        .map_err(|e| format!("metrics registry lock poisoned: {}", e))?
        .gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    Ok((buffer, encoder.format_type().to_string()))
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode(&registry) {
        Ok((buffer, content_type)) => {
            let mut response = Response::new(Body::from(buffer));
            if let Ok(value) = content_type.parse() {
                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("# ERROR ENCODING METRICS"));
            *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    match encode(registry) {
        Ok((buffer, _)) => String::from_utf8(buffer)
            .unwrap_or_else(|_| String::from("# ERROR ENCODING METRICS TO UTF-8")),
        Err(e) => format!("# ERROR ENCODING METRICS: {}", e),
    }
}
