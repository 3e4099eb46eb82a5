//! Archive names and the mirror's own download URLs.

use tracing::warn;
use url::Url;

use crate::types::{Platform, ProviderCoordinate, VersionResponse, validate_path_component};

/// Used when no usable filename can be recovered from an upstream URL.
pub const FALLBACK_FILENAME: &str = "archive.zip";

/// Canonical archive name:
/// `terraform-provider-{type}_{version}_{os}_{arch}.zip`.
pub fn archive_filename(provider_type: &str, version: &str, platform: &Platform) -> String {
    format!(
        "terraform-provider-{provider_type}_{version}_{}_{}.zip",
        platform.os, platform.arch
    )
}

/// The mirror's download route for one archive:
/// `{base_url}/download/{hostname}/{namespace}/{type}/{version}/{os}/{arch}/{filename}`.
pub fn download_url(
    base_url: &str,
    coord: &ProviderCoordinate,
    version: &str,
    platform: &Platform,
    filename: &str,
) -> String {
    format!(
        "{}/download/{}/{}/{}/{version}/{}/{}/{filename}",
        base_url.trim_end_matches('/'),
        coord.hostname(),
        coord.namespace(),
        coord.provider_type(),
        platform.os,
        platform.arch
    )
}

/// Last path segment of an archive URL.
///
/// Relative or unparsable URLs are split as plain strings. Anything that
/// does not yield a safe, non-empty segment becomes [`FALLBACK_FILENAME`].
pub fn extract_filename(archive_url: &str) -> String {
    let candidate = match Url::parse(archive_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_owned),
        Err(_) => {
            let path = archive_url
                .split(['?', '#'])
                .next()
                .unwrap_or_default();
            path.rsplit('/').find(|s| !s.is_empty()).map(str::to_owned)
        }
    };
    match candidate {
        Some(name) if validate_path_component("filename", &name).is_ok() => name,
        _ => FALLBACK_FILENAME.to_string(),
    }
}

/// Point every archive of an upstream version document at this mirror.
///
/// Hashes are passed through. Entries whose platform key does not parse
/// are left as they are.
pub fn rewrite_archive_urls(
    base_url: &str,
    coord: &ProviderCoordinate,
    version: &str,
    mut document: VersionResponse,
) -> VersionResponse {
    for (key, archive) in document.archives.iter_mut() {
        if archive.url.is_empty() {
            continue;
        }
        let platform = Platform::parse_key(key).filter(|p| {
            validate_path_component("os", &p.os).is_ok()
                && validate_path_component("arch", &p.arch).is_ok()
        });
        let Some(platform) = platform else {
            warn!(
                provider = %coord,
                version,
                platform_key = %key,
                "skipping archive with malformed platform key"
            );
            continue;
        };
        let filename = extract_filename(&archive.url);
        archive.url = download_url(base_url, coord, version, &platform, &filename);
    }
    document
}
