// * Telemetry - JSON Logging and Prometheus Metrics
// * Structured logs go to stdout and into the rolling log; probe, alert and
// * report outcomes are exported as counters

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, CounterVec, Encoder, Gauge, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ops::ring_log::RingLog;

lazy_static! {
    // * Probe outcomes by classification
    pub static ref PROBES_TOTAL: CounterVec = register_counter_vec!(
        "tally_probes_total",
        "Probe attempts by outcome",
        &["outcome"]
    ).expect("tally_probes_total registration");

    // * Alerts raised by kind
    pub static ref ALERTS_TOTAL: CounterVec = register_counter_vec!(
        "tally_alerts_total",
        "Alerts raised by kind",
        &["kind"]
    ).expect("tally_alerts_total registration");

    // * Collector sends by result
    pub static ref REPORTS_TOTAL: CounterVec = register_counter_vec!(
        "tally_reports_total",
        "Collector sends by result",
        &["status"]
    ).expect("tally_reports_total registration");

    // * Last observed signal value
    pub static ref LAST_KNOWN_COUNT: Gauge = register_gauge!(
        "tally_last_known_count",
        "Last observed unread count"
    ).expect("tally_last_known_count registration");

    // * Seconds until the next scheduled probe
    pub static ref NEXT_PROBE_SECONDS: Gauge = register_gauge!(
        "tally_next_probe_seconds",
        "Seconds remaining until the next scheduled probe"
    ).expect("tally_next_probe_seconds registration");
}

/// Initializes JSON logging plus the rolling log layer
///
/// `RUST_LOG` overrides `level` when set.
pub fn init_tracing(level: &str, ring_log: &RingLog) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .with(ring_log.layer())
        .init();
}

/// Initializes pretty logging plus the rolling log layer (for development)
pub fn init_tracing_pretty(level: &str, ring_log: &RingLog) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().pretty())
        .with(ring_log.layer())
        .init();
}

/// Metrics server handle for graceful shutdown
pub struct MetricsServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    running: Arc<AtomicBool>,
}

impl MetricsServerHandle {
    /// Signals the metrics server to shut down
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Returns true if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Starts the Prometheus metrics HTTP server on the specified port
pub async fn start_metrics_server(port: u16) -> MetricsServerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tokio::spawn(async move {
        let make_svc = hyper::service::make_service_fn(|_conn| async {
            Ok::<_, std::convert::Infallible>(hyper::service::service_fn(handle_metrics_request))
        });

        let server = match hyper::Server::try_bind(&addr) {
            Ok(builder) => builder.serve(make_svc).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            }),
            Err(e) => {
                tracing::error!(port = port, error = %e, "Metrics server failed to bind");
                running_clone.store(false, Ordering::Relaxed);
                return;
            }
        };

        tracing::info!(port = port, "Metrics server started");

        if let Err(e) = server.await {
            tracing::error!(error = %e, "Metrics server error");
        }

        running_clone.store(false, Ordering::Relaxed);
        tracing::info!("Metrics server stopped");
    });

    MetricsServerHandle {
        shutdown_tx: Some(shutdown_tx),
        running,
    }
}

fn plain_response(status: u16, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() =
        hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
    response
}

/// Handles incoming HTTP requests to the metrics endpoint
async fn handle_metrics_request(
    req: hyper::Request<hyper::Body>,
) -> Result<hyper::Response<hyper::Body>, std::convert::Infallible> {
    match req.uri().path() {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
                return Ok(plain_response(500, "metrics encoding failed"));
            }

            let mut response = hyper::Response::new(hyper::Body::from(buffer));
            if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            Ok(response)
        }
        "/health" => Ok(plain_response(200, "OK")),
        _ => Ok(plain_response(404, "Not Found")),
    }
}

/// Returns the current metrics as a string
pub fn get_metrics_string() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Records one probe classification
pub fn record_probe(outcome: &str) {
    PROBES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Records one raised alert
pub fn record_alert(kind: &str) {
    ALERTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Records one collector send result
pub fn record_report(status: &str) {
    REPORTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn set_last_known_count(count: u64) {
    LAST_KNOWN_COUNT.set(count as f64);
}

pub fn set_next_probe_seconds(seconds: u64) {
    NEXT_PROBE_SECONDS.set(seconds as f64);
}
