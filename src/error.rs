//! Speculum error types

use std::sync::Arc;

/// Speculum error types
#[derive(Debug, thiserror::Error)]
pub enum SpeculumError {
    // Lookup outcomes
    #[error("not found: {0}")]
    NotFound(String),

    /// A version document was requested for a discovery-capable host before
    /// its bulk listing was cached. The index for the provider has to be
    /// requested first.
    #[error("no cached versions listing available for {0}")]
    ListingUnavailable(String),

    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream returned status {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("failed to parse {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Service discovery failed. Shared by every caller that waited on the
    /// same in-flight lookup, hence the `Arc`.
    #[error("service discovery failed for {hostname}: {reason}")]
    Discovery {
        hostname: String,
        reason: Arc<SpeculumError>,
    },

    // Validation errors
    #[error("invalid service discovery document: {0}")]
    InvalidDiscovery(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid provider coordinate: {0}")]
    InvalidCoordinate(String),

    // Persistence errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SpeculumError {
    /// Whether the error is worth retrying: transport failures and 5xx
    /// responses. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            SpeculumError::Http(_) => true,
            SpeculumError::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the error means the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SpeculumError::NotFound(_) | SpeculumError::ListingUnavailable(_)
        )
    }

    /// HTTP status the serving layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            SpeculumError::NotFound(_) | SpeculumError::ListingUnavailable(_) => 404,
            SpeculumError::InvalidCoordinate(_) => 400,
            SpeculumError::Http(_)
            | SpeculumError::UpstreamStatus { .. }
            | SpeculumError::Decode { .. }
            | SpeculumError::Discovery { .. }
            | SpeculumError::InvalidDiscovery(_)
            | SpeculumError::InvalidUrl(_) => 502,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for SpeculumError {
    fn from(err: reqwest::Error) -> Self {
        // Signed download URLs must not leak into logs or responses.
        SpeculumError::Http(err.without_url().to_string())
    }
}

/// Result type alias for Speculum operations
pub type Result<T> = std::result::Result<T, SpeculumError>;
