//! Telemetry metric name constants.
//!
//! Centralised metric names for speculum operations. The library never
//! installs a `metrics` recorder; without one, all metric calls are no-ops.
//! `speculumd` installs a Prometheus recorder and serves it at `/metrics`
//! (see `server::observability`).
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `speculum_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `resource`: cached resource kind ("index", "version", "bulk_listing",
//!   "archive")
//! - `operation`: upstream call, e.g. "fetch_index" or "fetch_download_url"
//! - `status`: "ok" or "error"; the HTTP status code for `http_*` metrics

/// Requests answered from the local cache.
///
/// Labels: `resource`.
pub const CACHE_HITS_TOTAL: &str = "speculum_cache_hits_total";

/// Requests that had to go upstream.
///
/// Labels: `resource`.
pub const CACHE_MISSES_TOTAL: &str = "speculum_cache_misses_total";

/// Best-effort metadata cache writes that failed.
///
/// Labels: `resource`.
pub const CACHE_WRITE_FAILURES_TOTAL: &str = "speculum_cache_write_failures_total";

/// Upstream calls, counted once per logical call (retries excluded).
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const UPSTREAM_REQUESTS_TOTAL: &str = "speculum_upstream_requests_total";

/// Upstream call duration in seconds, retries and backoff included.
///
/// Labels: `operation`.
pub const UPSTREAM_DURATION_SECONDS: &str = "speculum_upstream_duration_seconds";

/// Retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "speculum_retries_total";

/// Service discovery documents fetched from upstream.
///
/// Labels: `outcome` ("ok" | "error" | "invalid").
pub const DISCOVERY_FETCHES_TOTAL: &str = "speculum_discovery_fetches_total";

/// Discovery lookups that attached to an already in-flight fetch.
pub const DISCOVERY_COALESCED_TOTAL: &str = "speculum_discovery_coalesced_total";

/// Inbound HTTP requests.
///
/// Labels: `route`, `status`.
pub const HTTP_REQUESTS_TOTAL: &str = "speculum_http_requests_total";

/// Inbound HTTP request duration in seconds.
///
/// Labels: `route`, `status`.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "speculum_http_request_duration_seconds";
