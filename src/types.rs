//! Core types for fhir-bulk-dl

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::resource_types::{extract_file_name, infer_resource_type};

/// One export job lifecycle, from kickoff to manifest
///
/// Owned by the client between kickoff and the final poll; the pipeline
/// drops it once the manifest has been extracted.
#[derive(Clone, Debug)]
pub struct ExportJob {
    /// The URL the export was kicked off against
    pub kickoff_url: Url,
    /// The status URL returned in the kickoff's Content-Location header
    pub status_url: Url,
    /// Where the job is in its lifecycle
    pub state: JobState,
}

/// Lifecycle state of an export job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Kicked off; the server still reports 202 on the status URL
    Pending,
    /// The status URL answered 200 and produced a manifest
    Ready,
    /// The status URL answered a terminal error status
    Failed,
}

/// The raw completed-job response, before link extraction
///
/// Carries both places a manifest can live: the `Link` response header and
/// the response body. Which one is consumed is decided by the configured
/// extraction strategy.
#[derive(Clone, Debug)]
pub struct ManifestResponse {
    /// Value of the `Link` header, when the server sent one
    pub link_header: Option<String>,
    /// The response body bytes
    pub body: Vec<u8>,
}

/// A downloadable resource reference extracted from a manifest
///
/// Derived data: never mutated after extraction, and fetched in manifest
/// order.
#[derive(Clone, Debug)]
pub struct ResourceLink {
    /// Absolute URL of the NDJSON payload
    pub url: Url,
    /// File name inferred from the URL path
    pub file_name: String,
    /// Resource type inferred from the file name, when one matched
    pub resource_type: Option<&'static str>,
}

impl ResourceLink {
    /// Build a link from an absolute URL, inferring file name and type
    #[must_use]
    pub fn new(url: Url) -> Self {
        let file_name = extract_file_name(url.path()).to_string();
        let resource_type = infer_resource_type(&file_name);
        Self {
            url,
            file_name,
            resource_type,
        }
    }
}

/// A fetched, validated resource payload
///
/// Transient: exists for one fetch-dispatch cycle and is dropped once every
/// sink has accepted it. Sinks own persistence.
#[derive(Clone, Debug)]
pub struct FetchedResource {
    /// The link this payload was fetched from
    pub link: ResourceLink,
    /// The Content-Type header the server sent
    pub content_type: String,
    /// The NDJSON payload, opaque to the core
    pub payload: Vec<u8>,
}

/// Progress events emitted by the pipeline
///
/// Broadcast to subscribers during a run; the structured replacement for
/// per-link stdout narration. Every event is also mirrored as a tracing log
/// line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExportEvent {
    /// Kickoff accepted; polling begins
    KickoffAccepted {
        /// The status URL being polled
        status_url: String,
    },

    /// Status poll answered 202; job still processing
    JobPending {
        /// Poll attempts issued so far
        attempt: u32,
    },

    /// Status poll answered 200; manifest extracted
    ManifestReady {
        /// Number of resource links in the manifest
        link_count: usize,
    },

    /// Fetch of one resource link started
    Fetching {
        /// The link being fetched
        url: String,
    },

    /// One resource fetched and validated
    Fetched {
        /// File name inferred from the link
        file_name: String,
        /// Inferred resource type, when one matched
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_type: Option<String>,
        /// Payload size in bytes
        bytes: u64,
    },

    /// One sink accepted one resource
    SinkDispatched {
        /// File name of the dispatched resource
        file_name: String,
        /// Name of the accepting sink
        sink: String,
    },

    /// One resource failed to fetch or dispatch
    ResourceFailed {
        /// The link that failed
        url: String,
        /// The failure rendered to text
        error: String,
    },

    /// The run finished
    Completed {
        /// Number of links fully dispatched
        succeeded: usize,
        /// Number of links that failed (nonzero only with continue-on-error)
        failed: usize,
    },
}

/// Outcome of one resource link within a run
#[derive(Clone, Debug, Serialize)]
pub struct ResourceOutcome {
    /// The resource link
    pub url: String,
    /// File name inferred from the link
    pub file_name: String,
    /// Inferred resource type, when one matched
    pub resource_type: Option<&'static str>,
    /// Payload size in bytes (0 when the fetch failed)
    pub bytes: u64,
    /// Names of the sinks that accepted the resource
    pub sinks: Vec<&'static str>,
    /// The failure rendered to text, when the link failed
    pub error: Option<String>,
}

impl ResourceOutcome {
    /// Whether this link was fetched and dispatched without error
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a completed (or aborted-with-continue) export run
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// Per-link outcomes, in manifest order
    pub outcomes: Vec<ResourceOutcome>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl Report {
    /// Number of links fully dispatched
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of links that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}
