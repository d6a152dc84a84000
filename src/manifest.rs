//! Manifest link extraction
//!
//! A completed export job lists its downloadable resources in one of two
//! places: the `Link` response header (comma-joined URLs wrapped in `< >`)
//! or a JSON body with a top-level `output` array. The configured strategy
//! decides which one is consumed; both produce links in manifest order with
//! no deduplication.

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::types::{ManifestResponse, ResourceLink};

/// Typed shape of the manifest body, of which only `output[].url` is consumed
#[derive(Debug, Deserialize)]
struct ExportManifest {
    output: Vec<ManifestOutput>,
}

#[derive(Debug, Deserialize)]
struct ManifestOutput {
    url: String,
}

/// Extract resource links from a completed-job response
///
/// Selects the strategy from `links_in_body`, resolves every link against
/// `base` (the status URL), and infers file names and resource types.
pub fn extract_links(
    links_in_body: bool,
    base: &Url,
    manifest: &ManifestResponse,
) -> Result<Vec<ResourceLink>> {
    let raw = if links_in_body {
        links_from_body(&manifest.body)?
    } else {
        links_from_header(manifest.link_header.as_deref().unwrap_or(""))
    };

    raw.into_iter()
        .map(|entry| {
            let url = base.join(&entry).map_err(|source| Error::InvalidUrl {
                value: entry,
                source,
            })?;
            Ok(ResourceLink::new(url))
        })
        .collect()
}

/// Split a `Link` header into link strings
///
/// Entries are split on `,` and stripped of surrounding whitespace and
/// angle-bracket delimiters. Empty entries (a trailing comma, an empty
/// header) are dropped with a warning: a link URL is never empty, and
/// keeping the empty string would only defer a guaranteed fetch failure.
pub fn links_from_header(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(|entry| entry.trim().trim_matches(['<', '>']).to_string())
        .filter(|entry| {
            if entry.is_empty() {
                tracing::warn!("dropping empty entry in Link header");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Parse a manifest body into link strings
///
/// The body must be a JSON object with an `output` array whose every element
/// carries a string `url`. Any violation fails the whole extraction;
/// malformed entries are never silently dropped.
pub fn links_from_body(body: &[u8]) -> Result<Vec<String>> {
    let manifest: ExportManifest =
        serde_json::from_slice(body).map_err(|e| Error::MalformedManifest {
            detail: e.to_string(),
        })?;

    manifest
        .output
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.url.is_empty() {
                return Err(Error::MalformedManifest {
                    detail: format!("output[{i}].url is empty"),
                });
            }
            Ok(entry.url)
        })
        .collect()
}
