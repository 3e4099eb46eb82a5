//! Route handlers.

use std::any::Any;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error};

use crate::SpeculumError;
use crate::mirror::Mirror;
use crate::types::{Platform, ProviderCoordinate, validate_path_component};

/// Metadata may change upstream; keep client caches short.
const METADATA_CACHE_CONTROL: &str = "public, max-age=300";
/// Published archives never change.
const ARCHIVE_CACHE_CONTROL: &str = "public, max-age=31536000";

/// A [`SpeculumError`] rendered as a JSON error response.
pub struct ApiError(SpeculumError);

impl From<SpeculumError> for ApiError {
    fn from(err: SpeculumError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "request failed");
        } else {
            debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type HandlerResult = std::result::Result<Response, ApiError>;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Anything no route matched.
pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

/// Response for a handler that panicked. The panic payload is not echoed.
pub fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    error!("request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// `GET /{hostname}/{namespace}/{type}/index.json` and
/// `GET /{hostname}/{namespace}/{type}/{version}.json`.
pub async fn metadata(
    State(mirror): State<Arc<Mirror>>,
    Path((hostname, namespace, provider_type, file)): Path<(String, String, String, String)>,
) -> HandlerResult {
    let coord = ProviderCoordinate::new(hostname, namespace, provider_type)?;
    let data = if file == "index.json" {
        mirror.get_index(&coord).await?
    } else if let Some(version) = file.strip_suffix(".json") {
        mirror.get_version(&coord, version).await?
    } else {
        return Err(SpeculumError::NotFound(format!("{coord}/{file}")).into());
    };
    Ok(json_response(data))
}

/// `GET /download/{hostname}/{namespace}/{type}/{version}/{os}/{arch}/{filename}`.
pub async fn download(
    State(mirror): State<Arc<Mirror>>,
    Path((hostname, namespace, provider_type, version, os, arch, filename)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> HandlerResult {
    let coord = ProviderCoordinate::new(hostname, namespace, provider_type)?;
    validate_path_component("filename", &filename)?;
    let platform = Platform::new(os, arch);
    let storage_path = coord.archive_path(&filename);

    let stream = mirror
        .get_archive(&coord, &version, &platform, &storage_path)
        .await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|e| SpeculumError::InvalidCoordinate(format!("filename {filename:?}: {e}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static(ARCHIVE_CACHE_CONTROL),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn json_response(data: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, METADATA_CACHE_CONTROL),
        ],
        data,
    )
        .into_response()
}
