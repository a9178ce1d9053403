//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "mysql_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "mysql_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "mysql_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Managed resources written by the applier
    pub static ref APPLIED_RESOURCES: CounterVec = register_counter_vec!(
        "mysql_operator_applied_resources_total",
        "Managed resources applied by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    /// Backup requests by outcome
    pub static ref BACKUPS_TOTAL: CounterVec = register_counter_vec!(
        "mysql_operator_backups_total",
        "Total number of backup requests by outcome",
        &["outcome", "namespace"]
    ).unwrap();

    /// Completed retention sweeps
    pub static ref RETENTION_SWEEPS: Counter = register_counter!(
        "mysql_operator_retention_sweeps_total",
        "Total number of retention sweeps"
    ).unwrap();

    /// Backup records deleted by the sweeper
    pub static ref BACKUPS_EXPIRED: Counter = register_counter!(
        "mysql_operator_backups_expired_total",
        "Backup records deleted after their retention window"
    ).unwrap();

    /// Sweep failures (whole cycles and individual records)
    pub static ref SWEEP_ERRORS: Counter = register_counter!(
        "mysql_operator_sweep_errors_total",
        "Errors encountered during retention sweeps"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "mysql_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Serve `/metrics`, `/healthz` and `/readyz` until `shutdown` is cancelled
pub async fn serve(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
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

    OPERATOR_HEALTH.set(0.0);
    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text(StatusCode::OK, "ok"),
        "/readyz" | "/ready" if OPERATOR_HEALTH.get() > 0.0 => text(StatusCode::OK, "ok"),
        "/readyz" | "/ready" => text(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = text(StatusCode::OK, buffer);
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}
