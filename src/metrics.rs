use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "geo_loadtest".to_string());

    // === Request Metrics ===

    pub static ref REQUEST_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["label"]
        ).unwrap();

    pub static ref REQUEST_FAILURES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_failures_total", "Number of failed requests by category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["label", "category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["label"]
        ).unwrap();

    // === Virtual User Metrics ===

    pub static ref ACTIVE_VIRTUAL_USERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_virtual_users", "Number of virtual users currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Optimization Job Metrics ===

    pub static ref VRP_JOBS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("vrp_jobs_total", "Optimization jobs by final result")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["result"]  // finished, failed, cancelled, poll_limit
        ).unwrap();

    pub static ref VRP_POLLS_PER_JOB: Histogram =
        Histogram::with_opts(
            HistogramOpts::new("vrp_polls_per_job", "Solution polls issued per optimization job")
                .namespace(METRIC_NAMESPACE.as_str())
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 500.0])
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    prometheus::default_registry().register(Box::new(REQUEST_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_FAILURES.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    prometheus::default_registry().register(Box::new(ACTIVE_VIRTUAL_USERS.clone()))?;
    prometheus::default_registry().register(Box::new(VRP_JOBS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(VRP_POLLS_PER_JOB.clone()))?;

    Ok(())
}

/// Encodes every metric family of `registry` in the Prometheus text format.
fn encode_registry(registry: &Mutex<Registry>) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = match registry.lock() {
        Ok(registry) => registry.gather(),
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
            let mut response = Response::new(Body::from("failed to encode metrics"));
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

    let server = Server::bind(&addr).serve(make_svc);
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
        Err(e) => format!("# ERROR ENCODING METRICS: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_from_custom_registry() {
        let registry = Registry::new();
        registry.register(Box::new(REQUEST_TOTAL.clone())).unwrap();
        REQUEST_TOTAL.with_label_values(&["Route"]).inc();

        let output = gather_metrics_string(&Arc::new(Mutex::new(registry)));
        assert!(output.contains("geo_loadtest_requests_total"));
        assert!(output.contains("label=\"Route\""));
    }
}
