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
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "activitypub_loadtest".to_string());

    // === Request Metrics ===

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_by_category_total", "Transport failures by category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    // === Check Metrics ===

    pub static ref CHECKS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("checks_total", "Total number of response checks")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["check", "result"]  // result: passed, failed
        ).unwrap();

    pub static ref ERROR_RATE_SAMPLES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("error_rate_samples_total", "Error-rate samples by errorType")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["error_type", "result"]  // result: passed, failed
        ).unwrap();

    pub static ref PAGES_FETCHED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("pages_fetched_total", "Collection pages fetched while paginating")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Driver Metrics ===

    pub static ref ITERATIONS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("iterations_total", "Completed scenario iterations")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref DROPPED_ITERATIONS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("dropped_iterations_total", "Iterations not started because every VU was busy")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACTIVE_VUS: Gauge =
        Gauge::with_opts(
            Opts::new("active_vus", "Virtual users currently running an iteration")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref THRESHOLDS_BREACHED_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("thresholds_breached_total", "Threshold evaluations that failed")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["metric"]
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = prometheus::default_registry();

    // Request metrics
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;

    // Check metrics
    registry.register(Box::new(CHECKS_TOTAL.clone()))?;
    registry.register(Box::new(ERROR_RATE_SAMPLES_TOTAL.clone()))?;
    registry.register(Box::new(PAGES_FETCHED_TOTAL.clone()))?;

    // Driver metrics
    registry.register(Box::new(ITERATIONS_TOTAL.clone()))?;
    registry.register(Box::new(DROPPED_ITERATIONS_TOTAL.clone()))?;
    registry.register(Box::new(ACTIVE_VUS.clone()))?;
    registry.register(Box::new(THRESHOLDS_BREACHED_TOTAL.clone()))?;

    Ok(())
}

fn encode_registry(registry: &Arc<Mutex<Registry>>) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = match registry.lock() {
        Ok(guard) => guard.gather(),
        Err(poisoned) => poisoned.into_inner().gather(),
    };
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode_registry(&registry) {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            if let Ok(value) = TextEncoder::new().format_type().parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("metrics encoding failed"));
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

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    match encode_registry(registry) {
        Ok(buffer) => String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Error encoding metrics to UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }),
        Err(e) => {
            error!(error = %e, "Error encoding metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}
