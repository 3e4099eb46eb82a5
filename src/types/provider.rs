//! Provider addressing types.
//!
//! A provider is addressed by `(hostname, namespace, type)`; a single
//! downloadable build of it additionally by version and [`Platform`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, SpeculumError};

/// Identifies one provider family on one upstream registry.
///
/// Every component is validated on construction and may be used verbatim
/// as a path segment, on disk and in upstream URLs: non-empty, not
/// `.`/`..`, no `/`, `\`, `?`, `#`, `%`, whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderCoordinate {
    hostname: String,
    namespace: String,
    provider_type: String,
}

impl ProviderCoordinate {
    /// Build a coordinate, rejecting components that are not safe path segments.
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Result<Self> {
        let coord = Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            provider_type: provider_type.into(),
        };
        coord.validate()?;
        Ok(coord)
    }

    /// Re-check every component. Storage backends call this at their boundary.
    pub fn validate(&self) -> Result<()> {
        validate_path_component("hostname", &self.hostname)?;
        validate_path_component("namespace", &self.namespace)?;
        validate_path_component("type", &self.provider_type)?;
        Ok(())
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Relative storage path for an archive of this provider:
    /// `{hostname}/{namespace}/{type}/{filename}`.
    pub fn archive_path(&self, filename: &str) -> String {
        format!(
            "{}/{}/{}/{filename}",
            self.hostname, self.namespace, self.provider_type
        )
    }
}

impl fmt::Display for ProviderCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.hostname, self.namespace, self.provider_type
        )
    }
}

/// Check that `value` can be used as a single path segment.
pub fn validate_path_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SpeculumError::InvalidCoordinate(format!(
            "{field} cannot be empty"
        )));
    }
    if value == "." || value == ".." {
        return Err(SpeculumError::InvalidCoordinate(format!(
            "{field} cannot be {value:?}"
        )));
    }
    if value.chars().any(is_forbidden) {
        return Err(SpeculumError::InvalidCoordinate(format!(
            "invalid character in {field}: {value:?}"
        )));
    }
    Ok(())
}

/// Characters that would change the meaning of an upstream URL or a
/// filesystem path when a component is pasted into one.
fn is_forbidden(c: char) -> bool {
    matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control()
}

/// An `(os, arch)` pair, e.g. `linux`/`amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Parse a platform key of the form `os_arch`.
    ///
    /// Exactly two non-empty parts are required; `"linux_amd64"` parses,
    /// `"invalid"`, `"too_many_parts_here"` and `""` do not.
    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.split('_');
        let os = parts.next()?;
        let arch = parts.next()?;
        if parts.next().is_some() || os.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(os, arch))
    }

    /// Underscore-joined platform key, the inverse of [`parse_key`](Self::parse_key).
    pub fn key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
