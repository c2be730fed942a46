//! Remote version resolution
//!
//! Lists the upstream directory, keeps entries whose whole name matches the
//! source pattern, and picks the highest version token. Ties on the token
//! go to the lexicographically greatest file name.

use std::sync::{Arc, LazyLock};

use archive_fs::checksum::parse_sidecar;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Url;

use crate::source::{SourceDescriptor, VersionPattern};
use crate::transport::TransportError;
use crate::{Error, Result};

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*"([^"]+)""#).expect("href pattern is valid"));

/// The newest artifact available upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub file_name: String,
    pub version: String,
    pub url: String,
    /// Published `sha256:<hex>`, when the source requests sidecar checks
    pub expected_checksum: Option<String>,
}

/// Finds the latest upstream artifact for a source.
pub trait VersionResolver: Send + Sync {
    fn resolve_latest(&self, source: &SourceDescriptor) -> Result<RemoteArtifact>;
}

/// Fetches a text document such as a directory listing.
pub trait ListingClient: Send + Sync {
    fn get_text(&self, url: &str) -> std::result::Result<String, TransportError>;
}

/// Resolver over an HTML directory listing.
#[derive(Clone)]
pub struct ListingResolver {
    client: Arc<dyn ListingClient>,
}

impl std::fmt::Debug for ListingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingResolver").finish_non_exhaustive()
    }
}

impl ListingResolver {
    pub fn new(client: Arc<dyn ListingClient>) -> Self {
        Self { client }
    }

    fn fetch_sidecar(&self, source: &SourceDescriptor, url: &str) -> Result<String> {
        let sidecar_url = format!("{}.sha256", url);
        let content = self
            .client
            .get_text(&sidecar_url)
            .map_err(|e| resolution(source, format!("checksum sidecar {}: {}", sidecar_url, e)))?;
        parse_sidecar(&content)
            .ok_or_else(|| resolution(source, format!("unparsable checksum sidecar {}", sidecar_url)))
    }
}

impl VersionResolver for ListingResolver {
    fn resolve_latest(&self, source: &SourceDescriptor) -> Result<RemoteArtifact> {
        let pattern = source.version_pattern()?;
        let base = listing_base(source)?;

        let listing = self
            .client
            .get_text(base.as_str())
            .map_err(|e| resolution(source, format!("listing {} unreachable: {}", base, e)))?;

        let entries = listing_entries(&listing, &base);
        let (version, file_name) =
            select_latest(entries.iter().map(|e| e.name.as_str()), &pattern).ok_or_else(|| {
                resolution(
                    source,
                    format!("no entry in {} matches '{}'", base, source.file_pattern),
                )
            })?;
        let url = entries
            .iter()
            .find(|e| e.name == file_name)
            .map(|e| e.url.to_string())
            .ok_or_else(|| resolution(source, format!("lost listing entry {}", file_name)))?;

        let expected_checksum = if source.verify_sidecar {
            Some(self.fetch_sidecar(source, &url)?)
        } else {
            None
        };

        tracing::info!(source = %source.name, version = %version, file = %file_name, "resolved latest remote version");
        Ok(RemoteArtifact {
            file_name,
            version,
            url,
            expected_checksum,
        })
    }
}

fn resolution(source: &SourceDescriptor, message: String) -> Error {
    Error::Resolution {
        source_name: source.name.clone(),
        message,
    }
}

/// Listing URL with a trailing slash so relative names join beneath it.
fn listing_base(source: &SourceDescriptor) -> Result<Url> {
    let mut raw = source.source_url.clone();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| resolution(source, format!("invalid source_url: {}", e)))
}

/// A file linked from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Decoded file name
    pub name: String,
    /// Absolute URL the link points at
    pub url: Url,
}

/// Files linked from an HTML listing at `base`.
///
/// Links are resolved against `base` and kept only when they point at a
/// file directly inside that directory, so absolute links to sibling
/// directories or other hosts are ignored.
pub fn listing_entries(html: &str, base: &Url) -> Vec<ListingEntry> {
    HREF.captures_iter(html)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str().split(['?', '#']).next()?;
            if href.is_empty() || href.ends_with('/') {
                return None;
            }
            let url = base.join(href).ok()?;
            if url.origin() != base.origin() {
                return None;
            }
            let (dir, segment) = url.path().rsplit_once('/')?;
            if base.path().strip_suffix('/') != Some(dir) {
                return None;
            }
            let name = percent_decode_str(segment).decode_utf8().ok()?;
            if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
                return None;
            }
            Some(ListingEntry {
                name: name.into_owned(),
                url,
            })
        })
        .collect()
}

/// Highest `(token, name)` among entries that match `pattern`.
pub fn select_latest<'a>(
    entries: impl IntoIterator<Item = &'a str>,
    pattern: &VersionPattern,
) -> Option<(String, String)> {
    entries
        .into_iter()
        .filter_map(|name| pattern.extract(name).map(|token| (token, name.to_string())))
        .max()
}
