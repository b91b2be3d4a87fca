//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "helm_project_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "helm_project_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind", "error"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "helm_project_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Project registration namespaces by state (active, orphaned)
    pub static ref REGISTRATION_NAMESPACES: GaugeVec = register_gauge_vec!(
        "helm_project_operator_registration_namespaces",
        "Number of project registration namespaces by state",
        &["state"]
    ).unwrap();

    /// Held leader locks (1 = held, 0 = not held)
    pub static ref LEADERSHIP: GaugeVec = register_gauge_vec!(
        "helm_project_operator_leadership",
        "Whether this instance holds the named leader lock",
        &["lock"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "helm_project_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();

    /// Set once all controllers are running (1 = ready, 0 = not ready)
    pub static ref OPERATOR_READY: prometheus::Gauge = prometheus::register_gauge!(
        "helm_project_operator_ready",
        "Whether all controllers have been started (1 = ready, 0 = not ready)"
    ).unwrap();
}

/// Record the tracked registration namespaces
pub fn set_registration_namespaces(active: usize, orphaned: usize) {
    REGISTRATION_NAMESPACES
        .with_label_values(&["active"])
        .set(active as f64);
    REGISTRATION_NAMESPACES
        .with_label_values(&["orphaned"])
        .set(orphaned as f64);
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path()))
}

fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" => text_response(StatusCode::OK, "ok"),
        // Standby instances without leadership are not ready
        "/readyz" if OPERATOR_READY.get() >= 1.0 => text_response(StatusCode::OK, "ok"),
        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "waiting for leadership"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse::<hyper::header::HeaderValue>() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = tokio_test::block_on(response.into_body().collect())
            .unwrap()
            .to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn readiness_follows_leadership() {
        OPERATOR_READY.set(0.0);
        assert_eq!(route("/readyz").status(), StatusCode::SERVICE_UNAVAILABLE);

        OPERATOR_READY.set(1.0);
        let response = route("/readyz");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response), "ok");
        OPERATOR_READY.set(0.0);
    }

    #[test]
    fn only_known_paths_are_served() {
        assert_eq!(route("/healthz").status(), StatusCode::OK);
        assert_eq!(route("/metrics").status(), StatusCode::OK);
        assert_eq!(route("/health").status(), StatusCode::NOT_FOUND);
        assert_eq!(route("/ready").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn registration_namespaces_are_exported() {
        set_registration_namespaces(3, 1);

        let response = route("/metrics");
        assert!(response.headers().contains_key(hyper::header::CONTENT_TYPE));
        let body = body_of(response);
        assert!(body.contains(r#"helm_project_operator_registration_namespaces{state="active"} 3"#));
        assert!(body.contains(r#"helm_project_operator_registration_namespaces{state="orphaned"} 1"#));
    }
}
