//! HTTP front end for the mirror.
//!
//! Serves the provider network mirror protocol under `/terraform/providers`,
//! the mirror's own archive download route, a health check and, when a
//! Prometheus handle is configured, the metrics scrape endpoint:
//!
//! ```text
//! GET /health
//! GET /metrics
//! GET /terraform/providers/{hostname}/{namespace}/{type}/index.json
//! GET /terraform/providers/{hostname}/{namespace}/{type}/{version}.json
//! GET /terraform/providers/download/{hostname}/{namespace}/{type}/{version}/{os}/{arch}/{filename}
//! ```
//!
//! Every request gets an `x-request-id` (kept if the client sent one,
//! echoed on the response), a tracing span carrying it, a request timeout,
//! and panic recovery into a JSON 500.

pub mod config;
pub mod handlers;
pub mod observability;

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::middleware;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::Result;
use crate::mirror::Mirror;

/// Path prefix of the mirror protocol routes.
pub const PROVIDERS_PREFIX: &str = "/terraform/providers";

/// Serving behaviour around the routes.
///
/// ```rust
/// # use speculum::server::ServerOptions;
/// # use std::time::Duration;
/// let options = ServerOptions::new()
///     .request_timeout(Duration::from_secs(30))
///     .shutdown_timeout(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct ServerOptions {
    /// Deadline for producing a response; exceeded requests get 408.
    /// Default: 120s.
    pub request_timeout: Duration,
    /// How long open connections may drain after the shutdown signal.
    /// Default: 30s.
    pub shutdown_timeout: Duration,
    /// Serve `/metrics` from this handle. Default: none.
    pub metrics: Option<PrometheusHandle>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            metrics: None,
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the application router.
pub fn router(mirror: Arc<Mirror>, options: &ServerOptions) -> Router {
    let providers = Router::new()
        .route(
            "/download/:hostname/:namespace/:type/:version/:os/:arch/:filename",
            get(handlers::download),
        )
        .route("/:hostname/:namespace/:type/:file", get(handlers::metadata));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .nest(PROVIDERS_PREFIX, providers);
    if let Some(handle) = options.metrics.clone() {
        app = app.route(
            "/metrics",
            get(move || observability::render(handle.clone())),
        );
    }

    app.route_layer(middleware::from_fn(observability::track_metrics))
        .fallback(handlers::not_found)
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(CatchPanicLayer::custom(handlers::panic_response))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(mirror)
}

/// Serve `mirror` on `listener` until `shutdown` resolves, then let open
/// connections drain for at most `options.shutdown_timeout`.
pub async fn serve<F>(
    listener: TcpListener,
    mirror: Arc<Mirror>,
    options: ServerOptions,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = oneshot::channel();
    let signal = async move {
        shutdown.await;
        let _ = signalled_tx.send(());
    };

    let server = axum::serve(listener, router(mirror, &options))
        .with_graceful_shutdown(signal)
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return Ok(result?),
        _ = signalled_rx => {}
    }

    match tokio::time::timeout(options.shutdown_timeout, server).await {
        Ok(result) => result?,
        Err(_) => warn!(
            timeout_secs = options.shutdown_timeout.as_secs(),
            "connections still open after shutdown timeout, closing them"
        ),
    }
    info!("server stopped");
    Ok(())
}
