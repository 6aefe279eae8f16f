use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use loadtest_worker::client::warn_if_insecure;
use loadtest_worker::config::{LogFormat, WorkerSettings};
use loadtest_worker::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use loadtest_worker::reporter::CoordinatorReporter;
use loadtest_worker::task::TestTask;
use loadtest_worker::worker::Worker;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Test tasks are read as JSON Lines from standard input, one per line:");
    eprintln!(
        r#"  {{"test_id": "t1", "target_url": "http://host:8080", "dsl_script": "users: 5\n- GET /"}}"#
    );
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  COORDINATOR_URL         - Where progress/results/errors are posted (default: http://localhost:8001)");
    eprintln!("  WORKER_ID               - Worker identity (default: worker-<random 1000..9999>)");
    eprintln!("  METRICS_PORT            - Prometheus endpoint port (default: 9090)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: loadtest_worker)");
    eprintln!("  REPORT_TIMEOUT          - Coordinator request timeout: 10s, 1m (default: 10s)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  LOG_FORMAT              - text or json (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = match WorkerSettings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    init_tracing(settings.log_format);
    register_metrics()?;
    settings.log_summary();

    let client_config = settings.to_client_config();
    warn_if_insecure(&client_config);

    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    {
        let registry = registry_arc.clone();
        let port = settings.metrics_port;
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let reporter = CoordinatorReporter::new(settings.coordinator_url.clone(), settings.report_timeout)?;
    let worker = Worker::new(settings.worker_id.clone(), Arc::new(reporter), client_config);

    info!(worker_id = %worker.id(), "Waiting for test tasks on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let task = match TestTask::from_json(&line) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable task");
                continue;
            }
        };

        if let Err(e) = worker.run_task(&task).await {
            error!(test_id = %task.test_id, error = %e, "Task finished with error");
        }
    }

    info!("Input closed, shutting down");
    let final_metrics_output = gather_metrics_string(&registry_arc);
    info!(metrics = %final_metrics_output, "Final metrics");

    Ok(())
}
