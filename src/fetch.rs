//! Resource fetch and validation
//!
//! One fetch per manifest link: status must be 200, the content type must
//! carry the bulk NDJSON media type (a substring check, so parameters like
//! charset are tolerated), and the body is read fully into memory. The
//! payload itself stays an opaque byte stream here; record-level parsing is
//! a sink concern.

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use crate::error::{BULK_CONTENT_TYPE, Error, Result};
use crate::types::{FetchedResource, ResourceLink};

/// Fetch and validate one resource payload
pub async fn fetch_resource(
    http: &reqwest::Client,
    link: &ResourceLink,
) -> Result<FetchedResource> {
    let response = http.get(link.url.clone()).send().await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(Error::FetchFailed {
            url: link.url.to_string(),
            status,
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains(BULK_CONTENT_TYPE) {
        return Err(Error::UnexpectedContentType {
            url: link.url.to_string(),
            got: content_type,
        });
    }

    let payload = response
        .bytes()
        .await
        .map_err(|source| Error::ReadBody {
            url: link.url.to_string(),
            source,
        })?
        .to_vec();

    tracing::debug!(url = %link.url, bytes = payload.len(), "resource fetched");

    Ok(FetchedResource {
        link: link.clone(),
        content_type,
        payload,
    })
}
