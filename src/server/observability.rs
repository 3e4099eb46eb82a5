//! Prometheus export of the `speculum_*` metrics and the HTTP metrics
//! middleware.

use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::telemetry;
use crate::{Result, SpeculumError};

/// How often histogram buckets are drained for rendering.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Install a Prometheus recorder as the global `metrics` recorder.
///
/// Fails if another global recorder is already installed.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().map_err(|e| {
        SpeculumError::Configuration(format!("failed to install metrics recorder: {e}"))
    })
}

/// Run the recorder's periodic upkeep for as long as the runtime lives.
pub fn spawn_upkeep(handle: PrometheusHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}

/// `GET /metrics` in the Prometheus text exposition format.
pub async fn render(handle: PrometheusHandle) -> Response {
    debug!("rendering metrics");
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

/// Record `speculum_http_*` for every routed request.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        telemetry::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        telemetry::HTTP_REQUEST_DURATION_SECONDS,
        "route" => route,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
    response
}
