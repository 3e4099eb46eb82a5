use std::sync::Arc;

use speculum::{Result, SpeculumError};

#[test]
fn test_error_display() {
    let err = SpeculumError::NotFound("registry.terraform.io/hashicorp/aws 9.9.9".to_string());
    assert!(err.to_string().contains("9.9.9"));

    let err = SpeculumError::UpstreamStatus {
        status: 418,
        url: "https://registry.example.com/x".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "upstream returned status 418 for https://registry.example.com/x"
    );
}

#[test]
fn test_discovery_error_names_host_and_cause() {
    let err = SpeculumError::Discovery {
        hostname: "registry.example.com".to_string(),
        reason: Arc::new(SpeculumError::Http("connection refused".to_string())),
    };
    let message = err.to_string();
    assert!(message.contains("registry.example.com"));
    assert!(message.contains("connection refused"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(SpeculumError::Storage("disk full".into()))
    }
    assert!(returns_error().is_err());
}

#[test]
fn test_io_error_converts() {
    fn open() -> Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"))?;
        Ok(())
    }
    assert!(matches!(open(), Err(SpeculumError::Io(_))));
}

// ============================================================================
// Transient error classification
// ============================================================================

fn status(status: u16) -> SpeculumError {
    SpeculumError::UpstreamStatus {
        status,
        url: "https://registry.example.com".into(),
    }
}

#[test]
fn transient_errors() {
    assert!(SpeculumError::Http("connection reset".into()).is_transient());
    assert!(status(500).is_transient());
    assert!(status(502).is_transient());
    assert!(status(503).is_transient());
}

#[test]
fn permanent_errors() {
    assert!(!status(400).is_transient());
    assert!(!status(403).is_transient());
    assert!(!SpeculumError::NotFound("x".into()).is_transient());
    assert!(!SpeculumError::InvalidDiscovery("x".into()).is_transient());
    assert!(!SpeculumError::Storage("x".into()).is_transient());
    assert!(!SpeculumError::Configuration("x".into()).is_transient());
}

// ============================================================================
// Status mapping
// ============================================================================

#[test]
fn not_found_family() {
    for err in [
        SpeculumError::NotFound("x".into()),
        SpeculumError::ListingUnavailable("x".into()),
    ] {
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
    }
    assert!(!status(404).is_not_found());
}

#[test]
fn upstream_failures_are_bad_gateway() {
    assert_eq!(status(503).status_code(), 502);
    assert_eq!(SpeculumError::Http("reset".into()).status_code(), 502);
    assert_eq!(SpeculumError::InvalidUrl("x".into()).status_code(), 502);
    assert_eq!(
        SpeculumError::Discovery {
            hostname: "h".into(),
            reason: Arc::new(status(500)),
        }
        .status_code(),
        502
    );
}

#[test]
fn local_failures() {
    assert_eq!(SpeculumError::InvalidCoordinate("x".into()).status_code(), 400);
    assert_eq!(SpeculumError::Storage("x".into()).status_code(), 500);
    assert_eq!(SpeculumError::Configuration("x".into()).status_code(), 500);
}
